mod controller;

pub use controller::SessionController;
