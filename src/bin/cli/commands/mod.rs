pub mod clear;
pub mod deck;
pub mod status;
pub mod study;
pub mod sync;
