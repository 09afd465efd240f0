pub mod finnhub;
pub mod news_api;
pub mod rss;

pub use finnhub::FinnhubFeed;
pub use news_api::FinnhubNewsClient;
