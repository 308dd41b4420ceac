mod file;

pub use file::FileCoordinator;
