//! Explicit application context: session, theme and install prompt state.

use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::model::{UnixTimeMs, UserId};
use crate::prefs::{PreferenceStore, PrefsError};

pub const THEME_KEY: &str = "cashlog_theme";
pub const INSTALL_DISMISSED_KEY: &str = "pwa_install_dismissed";
pub const INSTALL_DISMISSED_AT_KEY: &str = "pwa_install_dismissed_at";
pub const INSTALL_SNOOZE_MS: u64 = 24 * 60 * 60 * 1000;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Theme {
    #[default]
    Light,
    Dark,
}

impl Theme {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Theme::Light => "light",
            Theme::Dark => "dark",
        }
    }

    #[must_use]
    pub const fn toggled(self) -> Self {
        match self {
            Theme::Light => Theme::Dark,
            Theme::Dark => Theme::Light,
        }
    }
}

impl fmt::Display for Theme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Theme {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "light" => Ok(Theme::Light),
            "dark" => Ok(Theme::Dark),
            other => Err(format!("unknown theme '{other}'")),
        }
    }
}

/// Signed-in user. The token never appears in `Debug` output.
#[derive(Clone)]
pub struct Session {
    pub owner: UserId,
    access_token: SecretString,
}

impl Session {
    #[must_use]
    pub fn new(owner: UserId, access_token: impl Into<String>) -> Self {
        Self {
            owner,
            access_token: SecretString::new(access_token.into()),
        }
    }

    /// Value for an `Authorization: Bearer` header.
    #[must_use]
    pub fn bearer(&self) -> String {
        format!("Bearer {}", self.access_token.expose_secret())
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("owner", &self.owner)
            .field("access_token", &"[REDACTED]")
            .finish()
    }
}

pub struct AppContext<P: ?Sized> {
    prefs: Arc<P>,
    theme: Theme,
    session: Option<Session>,
}

impl<P: PreferenceStore + ?Sized> AppContext<P> {
    /// Reads the persisted theme, falling back to light when absent or
    /// unreadable.
    pub fn new(prefs: Arc<P>) -> Self {
        let theme = match prefs.get(THEME_KEY) {
            Ok(Some(value)) => value.parse().unwrap_or_else(|e: String| {
                warn!(error = %e, "Ignoring stored theme");
                Theme::default()
            }),
            Ok(None) => Theme::default(),
            Err(e) => {
                warn!(error = %e, "Failed to read theme preference");
                Theme::default()
            }
        };
        debug!(%theme, "Context initialized");
        Self {
            prefs,
            theme,
            session: None,
        }
    }

    #[must_use]
    pub fn theme(&self) -> Theme {
        self.theme
    }

    pub fn set_theme(&mut self, theme: Theme) -> Result<(), PrefsError> {
        self.prefs.set(THEME_KEY, theme.as_str())?;
        self.theme = theme;
        Ok(())
    }

    pub fn toggle_theme(&mut self) -> Result<Theme, PrefsError> {
        let next = self.theme.toggled();
        self.set_theme(next)?;
        Ok(next)
    }

    #[must_use]
    pub fn session(&self) -> Option<&Session> {
        self.session.as_ref()
    }

    #[must_use]
    pub fn owner(&self) -> Option<&UserId> {
        self.session.as_ref().map(|s| &s.owner)
    }

    pub fn sign_in(&mut self, session: Session) {
        info!(owner = %session.owner, "Signed in");
        self.session = Some(session);
    }

    pub fn sign_out(&mut self) {
        if let Some(session) = self.session.take() {
            info!(owner = %session.owner, "Signed out");
        }
    }

    /// Whether the install prompt may be shown at `now`. An expired
    /// dismissal is cleared as a side effect.
    pub fn should_offer_install(&self, now: UnixTimeMs) -> Result<bool, PrefsError> {
        if self.prefs.get(INSTALL_DISMISSED_KEY)?.as_deref() != Some("1") {
            return Ok(true);
        }

        let expires_at = self
            .prefs
            .get(INSTALL_DISMISSED_AT_KEY)?
            .and_then(|v| v.trim().parse::<u64>().ok());

        match expires_at {
            Some(expires_at) if now.0 < expires_at => Ok(false),
            _ => {
                self.prefs.remove(INSTALL_DISMISSED_KEY)?;
                self.prefs.remove(INSTALL_DISMISSED_AT_KEY)?;
                debug!("Install prompt snooze expired");
                Ok(true)
            }
        }
    }

    /// Hides the install prompt for the next 24 hours.
    pub fn dismiss_install_prompt(&self, now: UnixTimeMs) -> Result<(), PrefsError> {
        let expires_at = now.saturating_add(INSTALL_SNOOZE_MS);
        self.prefs.set(INSTALL_DISMISSED_KEY, "1")?;
        self.prefs
            .set(INSTALL_DISMISSED_AT_KEY, &expires_at.0.to_string())?;
        Ok(())
    }
}
