pub mod traits;
pub mod trackers;
pub mod notifiers;

pub use traits::{DispatchError, Mailer, PriceFetcher};
pub use trackers::PriceParser;
pub use notifiers::SmtpMailer;
