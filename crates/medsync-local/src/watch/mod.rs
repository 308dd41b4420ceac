mod notify_watcher;

pub use notify_watcher::watch_file;
