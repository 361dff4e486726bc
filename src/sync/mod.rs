pub mod engine;
pub mod poller;
pub mod subscription;

pub use engine::{ LoadingState, SyncEngine };
pub use poller::{ PollingRefresher, RefreshTarget };
pub use subscription::{ MessageSink, SubscriptionManager };
