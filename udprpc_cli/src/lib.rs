#![doc = include_str!("../README.md")]

pub mod config;
pub mod demo_handler;
pub mod error;
