pub mod fetchers;
pub mod news_feed;
pub mod remote;
pub mod traits;

pub use fetchers::{DepthFetcher, KlinesFetcher};
pub use news_feed::{NewsCollector, NewsFeed};
pub use remote::{BinanceClient, RemoteError};
pub use traits::{FetchError, Fetcher};
