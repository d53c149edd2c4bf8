mod catalog;
mod common;
mod sentinel;
mod service;
