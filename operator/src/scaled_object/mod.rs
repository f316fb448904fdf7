mod controller;

pub use controller::ScaledObjectController;
