//! JarvisBot - tells jokes in channels and takes visitor notes over DM.

pub mod classifier;
pub mod database;
pub mod dispatcher;
pub mod intent;
pub mod message;
pub mod notify;
pub mod platform;
pub mod rtm;
pub mod slack;

#[cfg(test)]
pub(crate) mod testing;

pub use database::{Appointment, Database, Joke};
pub use dispatcher::{DispatchState, Dispatcher, DispatcherConfig};
pub use intent::ParseMode;
pub use message::{BotIdentity, IncomingMessage, PlatformEvent, Session};
pub use notify::{Notifier, SideChannel};
pub use platform::Platform;
pub use rtm::RtmRuntime;
pub use slack::SlackClient;
