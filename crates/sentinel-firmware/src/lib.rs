#![no_std]

extern crate alloc;

pub mod board;
pub mod input;
pub mod sd_store;
