mod controller;

pub use controller::ScaledJobController;
