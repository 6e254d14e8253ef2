pub mod fetcher;
pub mod mailer;

pub use fetcher::PriceFetcher;
pub use mailer::{DispatchError, Mailer};
