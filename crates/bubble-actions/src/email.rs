//! `email` sends a templated message over SMTP using `lettre`.
//!
//! ```yaml
//! -
//!  action: email
//!  script:
//!   to: $recipients
//!   subject: Build finished
//!   body: $_INSTANCE succeeded
//! ```

use std::path::Path;

use async_trait::async_trait;
use bubble_env::{Any, Env};
use lettre::message::header::ContentType;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};

use crate::action::{Action, ActionBase, ActionFactory, ActionLog};
use crate::error::ActionError;

#[derive(Default, Clone)]
pub struct EmailFactory {
    host: String,
    port: u16,
    auth: bool,
    username: String,
    password: String,
}

impl ActionFactory for EmailFactory {
    fn validate(&mut self, conf: &Any) -> Result<(), ActionError> {
        let map = conf.map().ok_or(ActionError::BadConfig("email"))?;
        self.host = map.get("smtp").ok_or(ActionError::MissingField("smtp", "email"))?.to_display_string();
        self.port = map.get("port").ok_or(ActionError::MissingField("port", "email"))?.int() as u16;
        self.auth = map.get("auth").ok_or(ActionError::MissingField("auth", "email"))?.as_bool().unwrap_or(false);

        if self.auth {
            self.username =
                map.get("username").ok_or(ActionError::MissingField("username", "email"))?.to_display_string();
            self.password =
                map.get("password").ok_or(ActionError::MissingField("password", "email"))?.to_display_string();
        }

        self.build_transport()?;
        Ok(())
    }

    fn create(&self) -> Box<dyn Action> {
        Box::new(EmailAction { base: ActionBase::new(), f: self.clone() })
    }
}

impl EmailFactory {
    fn build_transport(&self) -> Result<AsyncSmtpTransport<Tokio1Executor>, ActionError> {
        let mut builder = AsyncSmtpTransport::<Tokio1Executor>::relay(&self.host)?.port(self.port);
        if self.auth {
            builder = builder.credentials(Credentials::new(self.username.clone(), self.password.clone()));
        }
        Ok(builder.build())
    }
}

pub struct EmailAction {
    base: ActionBase,
    f: EmailFactory,
}

#[async_trait]
impl Action for EmailAction {
    async fn init(&mut self, runner_id: u64, env: &mut Env) -> Result<(), ActionError> {
        self.base.init(runner_id, env).await
    }

    fn cwd(&self) -> &Path {
        self.base.cwd()
    }

    async fn execute(&self, script: &Any, _target: &str, env: &Env, log: &dyn ActionLog) -> bool {
        let Some(map) = script.map() else {
            self.base.set_error("email command format is incorrect");
            return false;
        };

        let Some(to) = map.get("to") else {
            self.base.set_error("not setting \"to\" in email command");
            return false;
        };
        let Some(subject) = map.get("subject") else {
            self.base.set_error("not setting \"subject\" in email command");
            return false;
        };
        let Some(body) = map.get("body") else {
            self.base.set_error("not setting \"body\" in email command");
            return false;
        };

        let recipients = env.format(to);
        let subject = env.format(subject);
        let body = env.format(body);

        let mut builder = Message::builder().from(match self.f.username.parse() {
            Ok(addr) => addr,
            Err(err) => {
                self.base.set_error(err);
                return false;
            }
        });
        for part in recipients.split(';').map(str::trim).filter(|s| !s.is_empty()) {
            builder = match part.parse() {
                Ok(addr) => builder.to(addr),
                Err(err) => {
                    self.base.set_error(err);
                    return false;
                }
            };
        }

        let message = match builder.subject(subject).header(ContentType::TEXT_HTML).body(body) {
            Ok(m) => m,
            Err(err) => {
                self.base.set_error(err);
                return false;
            }
        };

        let transport = match self.f.build_transport() {
            Ok(t) => t,
            Err(err) => {
                self.base.set_error(err);
                return false;
            }
        };

        match transport.send(message).await {
            Ok(_) => {
                log.write(format!("sent mail to {recipients}\n").as_bytes());
                true
            }
            Err(err) => {
                self.base.set_error(err);
                false
            }
        }
    }

    async fn cancel(&self) -> Result<(), ActionError> {
        Ok(())
    }

    fn error(&self) -> Option<String> {
        self.base.error()
    }
}
