#![allow(dead_code)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
// #![warn(clippy::cargo)]

extern crate blas_src;

pub mod activity;
pub mod calibration;
pub mod config;
pub mod correlation;
pub mod efficiency;
pub mod error;
pub mod literature;
pub mod math;
pub mod measurement;
pub(crate) mod minimisation;
pub mod peak;
pub mod session;
pub mod spectrum;

pub use error::{Error, FitStage};

pub type Result<T> = ::std::result::Result<T, Error>;
