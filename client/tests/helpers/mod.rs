#![allow(dead_code)]

pub mod polling;
pub mod stub_guard;
