// Author: Lukas Bower

//! Leaf device drivers.

pub mod e1000;
