//! Dispatch loop: consumes platform events one at a time and acts on them.

use chrono::{Local, SecondsFormat};
use rand::SeedableRng;
use rand::rngs::StdRng;
use serde_json::json;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use crate::bot::classifier::classify;
use crate::bot::database::{Appointment, Database};
use crate::bot::intent::{Expectation, ParseMode, parse_expectation};
use crate::bot::message::{BotIdentity, IncomingMessage, PlatformEvent, Session};
use crate::bot::notify::{BOT_MESSAGE_EVENT, Notifier};
use crate::bot::platform::Platform;
use crate::config::Config;
use crate::error::BotError;

pub const ACKNOWLEDGEMENT: &str = "Thank you, I will be looking out for them";
pub const CLARIFICATION: &str =
    "I did not understand what you meant. Please fill in the blanks : 'I am expecting _______ at ______(AM/PM)'";

pub fn welcome_text(bot_name: &str) -> String {
    format!(
        "Hi guys, roundhouse-kick anyone?\n I can tell jokes, but very honest ones. Just say `Chuck Norris` or `{bot_name}` to invoke me!"
    )
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchState {
    Disconnected,
    Connecting,
    Ready,
    Classifying,
    Acting,
}

#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    pub bot_name: String,
    pub db_path: PathBuf,
    /// Destination of the first-run welcome. First roster channel when unset.
    pub welcome_channel: Option<String>,
    pub parse_mode: ParseMode,
}

impl From<&Config> for DispatcherConfig {
    fn from(config: &Config) -> Self {
        Self {
            bot_name: config.name.clone(),
            db_path: config.db_path.clone(),
            welcome_channel: config.welcome_channel.clone(),
            parse_mode: if config.lenient_parsing {
                ParseMode::Lenient
            } else {
                ParseMode::Strict
            },
        }
    }
}

pub struct Dispatcher {
    config: DispatcherConfig,
    platform: Arc<dyn Platform>,
    notifier: Notifier,
    state: DispatchState,
    session: Session,
    identity: Option<BotIdentity>,
    database: Option<Arc<Database>>,
    /// Appointment writes waiting on the identity lookup.
    background: JoinSet<()>,
    rng: StdRng,
}

impl Dispatcher {
    pub fn new(config: DispatcherConfig, platform: Arc<dyn Platform>, notifier: Notifier) -> Self {
        Self {
            config,
            platform,
            notifier,
            state: DispatchState::Disconnected,
            session: Session::default(),
            identity: None,
            database: None,
            background: JoinSet::new(),
            rng: StdRng::from_entropy(),
        }
    }

    /// Use an already-open database instead of opening `db_path` on connect.
    pub fn with_database(mut self, database: Arc<Database>) -> Self {
        self.database = Some(database);
        self
    }

    pub fn with_rng(mut self, rng: StdRng) -> Self {
        self.rng = rng;
        self
    }

    pub fn state(&self) -> DispatchState {
        self.state
    }

    pub fn identity(&self) -> Option<&BotIdentity> {
        self.identity.as_ref()
    }

    /// Consume events until the sender side closes.
    pub async fn run(self, events: mpsc::Receiver<PlatformEvent>) -> Result<(), BotError> {
        self.run_until(events, std::future::pending()).await
    }

    /// Consume events until the sender side closes or `shutdown` resolves.
    /// Pending appointment writes are awaited either way. Only a fatal error
    /// (the store unusable at connect time) ends the loop early.
    pub async fn run_until(
        mut self,
        mut events: mpsc::Receiver<PlatformEvent>,
        shutdown: impl Future<Output = ()>,
    ) -> Result<(), BotError> {
        self.transition(DispatchState::Connecting);
        tokio::pin!(shutdown);

        let outcome = loop {
            let event = tokio::select! {
                event = events.recv() => event,
                _ = &mut shutdown => {
                    info!("Shutdown requested");
                    break Ok(());
                }
            };
            let Some(event) = event else {
                break Ok(());
            };

            match self.handle_event(event).await {
                Err(e) if e.is_fatal() => {
                    error!("Dispatcher stopping: {e}");
                    break Err(e);
                }
                Err(e) => warn!("Event abandoned: {e}"),
                Ok(()) => {}
            }
            while self.background.try_join_next().is_some() {}
        };

        self.transition(DispatchState::Disconnected);
        self.drain_background().await;
        outcome
    }

    pub async fn handle_event(&mut self, event: PlatformEvent) -> Result<(), BotError> {
        match event {
            PlatformEvent::Connected(session) => self.on_connect(session).await,
            PlatformEvent::Message(msg) => {
                self.on_message(&msg).await;
                Ok(())
            }
            PlatformEvent::Disconnected => {
                info!("Platform connection lost, waiting for reconnect");
                self.transition(DispatchState::Connecting);
                Ok(())
            }
        }
    }

    pub async fn on_connect(&mut self, session: Session) -> Result<(), BotError> {
        self.transition(DispatchState::Connecting);
        self.session = session;

        self.identity = self.session.resolve_identity(&self.config.bot_name);
        match self.identity {
            Some(ref me) => info!("Connected as {} ({})", me.name, me.id),
            None => warn!("Bot user {:?} not found in roster", self.config.bot_name),
        }

        let database = match self.database {
            Some(ref db) => db.clone(),
            None => {
                let db = Arc::new(Database::open(&self.config.db_path)?);
                self.database = Some(db.clone());
                db
            }
        };

        self.first_run_check(&database).await;
        self.transition(DispatchState::Ready);
        Ok(())
    }

    async fn first_run_check(&self, database: &Database) {
        let last_run = match database.run_meta() {
            Ok(last_run) => last_run,
            Err(e) => {
                warn!("Could not read last run: {e}");
                return;
            }
        };

        if last_run.is_none() {
            match self.welcome_channel() {
                Some(channel) => {
                    info!("First run, welcoming #{channel}");
                    if let Err(e) = self
                        .platform
                        .send_to_channel(&channel, &welcome_text(&self.config.bot_name))
                        .await
                    {
                        warn!("Welcome message failed: {e}");
                    }
                }
                None => warn!("First run but no channel to welcome"),
            }
        } else {
            debug!("Last run was {last_run:?}");
        }

        let now = Local::now().to_rfc3339_opts(SecondsFormat::Millis, false);
        if let Err(e) = database.set_run_meta(&now) {
            warn!("Could not record last run: {e}");
        }
    }

    fn welcome_channel(&self) -> Option<String> {
        self.config
            .welcome_channel
            .clone()
            .or_else(|| self.session.channels.first().map(|c| c.name.clone()))
    }

    pub async fn on_message(&mut self, msg: &IncomingMessage) {
        if self.state != DispatchState::Ready {
            debug!("Dropping message received while {:?}", self.state);
            return;
        }

        self.transition(DispatchState::Classifying);
        let class = classify(msg, self.identity.as_ref(), &self.config.bot_name);

        if class.joke || class.direct {
            self.transition(DispatchState::Acting);
            if class.joke {
                self.reply_with_joke(msg).await;
            }
            if class.direct {
                self.reply_direct(msg).await;
            }
        }
        self.transition(DispatchState::Ready);
    }

    async fn reply_with_joke(&mut self, msg: &IncomingMessage) {
        let Some(database) = self.database.clone() else {
            warn!("No database, skipping joke");
            return;
        };
        let Some(channel) = self.session.channel_by_id(msg.channel()).map(|c| c.name.clone()) else {
            warn!("Channel {} not in roster, skipping joke", msg.channel());
            return;
        };

        let joke = match database.next_joke(&mut self.rng) {
            Ok(Some(joke)) => joke,
            Ok(None) => {
                warn!("Joke table is empty");
                return;
            }
            Err(e) => {
                warn!("Joke lookup failed: {e}");
                return;
            }
        };

        info!("Joke {} for #{channel}", joke.id);
        if let Err(e) = self.platform.send_to_channel(&channel, &joke.text).await {
            warn!("Joke reply failed: {e}");
        }
        if let Err(e) = database.increment_joke_usage(joke.id) {
            warn!("Could not count joke {}: {e}", joke.id);
        }
    }

    async fn reply_direct(&mut self, msg: &IncomingMessage) {
        let Some(expectation) = parse_expectation(msg.text(), self.config.parse_mode) else {
            info!("Unrecognized direct message from {}", msg.user());
            if let Err(e) = self.platform.send_to_user(msg.user(), CLARIFICATION).await {
                warn!("Clarification reply failed: {e}");
            }
            return;
        };

        info!("{} is expecting {} at {}", msg.user(), expectation.person, expectation.time);

        match expectation.expected_at(Local::now().date_naive()) {
            None => warn!("Could not read {:?} as a time, appointment not recorded", expectation.time),
            Some(expected_at) => match self.database.clone() {
                Some(database) => {
                    let platform = self.platform.clone();
                    let notifier = self.notifier.clone();
                    let msg = msg.clone();
                    self.background.spawn(async move {
                        record_appointment(platform, database, notifier, msg, expectation, expected_at).await;
                    });
                }
                None => warn!("No database, appointment not recorded"),
            },
        }

        if let Err(e) = self.platform.send_to_user(msg.user(), ACKNOWLEDGEMENT).await {
            warn!("Acknowledgement failed: {e}");
        }
    }

    /// Wait for every pending appointment write.
    pub async fn drain_background(&mut self) {
        while let Some(result) = self.background.join_next().await {
            if let Err(e) = result {
                warn!("Appointment task failed: {e}");
            }
        }
    }

    fn transition(&mut self, next: DispatchState) {
        if self.state != next {
            debug!("{:?} -> {:?}", self.state, next);
            self.state = next;
        }
    }
}

/// Resolve the sender's profile, persist the appointment, then tell observers.
async fn record_appointment(
    platform: Arc<dyn Platform>,
    database: Arc<Database>,
    notifier: Notifier,
    msg: IncomingMessage,
    expectation: Expectation,
    expected_at: chrono::NaiveDateTime,
) {
    let profile = match platform.user_profile(msg.user()).await {
        Ok(profile) => profile,
        Err(e) => {
            warn!("Profile lookup for {} failed, appointment dropped: {e}", msg.user());
            return;
        }
    };

    let appointment = Appointment {
        real_name: profile.real_name,
        user_name: profile.user_name,
        email: profile.email,
        user_id: msg.user().to_string(),
        channel: msg.channel().to_string(),
        expected_at,
        expecting_who: expectation.person.clone(),
    };

    match database.create_appointment(&appointment) {
        Ok(id) => info!("Appointment {id} recorded for {}", appointment.user_name),
        Err(e) => {
            warn!("Appointment write failed: {e}");
            return;
        }
    }

    notifier.publish(
        BOT_MESSAGE_EVENT,
        json!({
            "user": msg.user(),
            "channel": msg.channel(),
            "text": msg.text(),
            "person": expectation.person,
            "time": expectation.time,
        }),
    );
}
