pub mod barcode;
pub mod classify;
pub mod gate;
pub mod motion;
pub mod sampler;
pub mod session;
