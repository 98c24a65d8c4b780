pub mod notifier;
pub mod reconciler;
pub mod refresher;
pub mod reporter;
pub mod scheduler;
pub mod steps;
