//! Typed access to the persisted UI preferences.
//!
//! Values are stored as strings under the same keys the web client used, so
//! a store exported from a browser profile reads back unchanged.

use std::path::Path;
use std::sync::Arc;

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use serde::Serialize;
use tracing::{debug, warn};

use crate::error::{Result, ValidationError};
use crate::i18n::Lang;
use crate::store::KeyValueStore;

pub const KEY_LANGUAGE: &str = "ui-lang";
pub const KEY_THEME: &str = "theme";
pub const KEY_WALLPAPER: &str = "bgImage";
pub const KEY_OPACITY: &str = "bgOpacity";
pub const KEY_BRIGHTNESS: &str = "bgBrightness";
pub const KEY_TIMESTAMPS: &str = "sw_timestamps";
pub const KEY_PEER_REVIEW: &str = "sw_peer_review";

/// Largest wallpaper accepted, in bytes.
pub const MAX_WALLPAPER_BYTES: usize = 4 * 1024 * 1024;
const PERCENT_DEFAULT: u8 = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Theme {
    #[default]
    Dark,
    Light,
}

impl Theme {
    pub fn parse(s: &str) -> std::result::Result<Self, ValidationError> {
        match s.trim().to_ascii_lowercase().as_str() {
            "dark" => Ok(Theme::Dark),
            "light" => Ok(Theme::Light),
            other => Err(ValidationError::UnknownTheme(other.to_string())),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Theme::Dark => "dark",
            Theme::Light => "light",
        }
    }
}

/// Everything `settings show` prints.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PreferencesSnapshot {
    pub language: String,
    pub theme: Theme,
    pub wallpaper_bytes: Option<usize>,
    pub opacity: u8,
    pub brightness: u8,
    pub timestamps: bool,
    pub peer_review: bool,
}

pub struct Preferences {
    store: Arc<dyn KeyValueStore>,
}

impl Preferences {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self { store }
    }

    /// Stored language; unknown values read as the default.
    pub fn language(&self) -> Result<Lang> {
        Ok(self
            .store
            .get(KEY_LANGUAGE)?
            .and_then(|v| Lang::parse(&v).ok())
            .unwrap_or_default())
    }

    pub fn set_language(&self, lang: Lang) -> Result<()> {
        self.store.set(KEY_LANGUAGE, lang.code())
    }

    pub fn theme(&self) -> Result<Theme> {
        Ok(self
            .store
            .get(KEY_THEME)?
            .and_then(|v| Theme::parse(&v).ok())
            .unwrap_or_default())
    }

    pub fn set_theme(&self, theme: Theme) -> Result<()> {
        self.store.set(KEY_THEME, theme.as_str())
    }

    /// Wallpaper as a `data:` URL, if one is set.
    pub fn wallpaper(&self) -> Result<Option<String>> {
        Ok(self.store.get(KEY_WALLPAPER)?.filter(|v| !v.is_empty()))
    }

    /// Validate and store raw image bytes.
    pub fn set_wallpaper(&self, bytes: &[u8], mime: &str) -> Result<()> {
        if bytes.len() > MAX_WALLPAPER_BYTES {
            return Err(ValidationError::WallpaperTooLarge { bytes: bytes.len() }.into());
        }
        if !mime.starts_with("image/") {
            return Err(ValidationError::NotAnImage(mime.to_string()).into());
        }
        let url = format!("data:{mime};base64,{}", STANDARD.encode(bytes));
        debug!(mime, bytes = bytes.len(), "storing wallpaper");
        self.store.set(KEY_WALLPAPER, &url)
    }

    /// Read an image file, guessing its type from the extension.
    pub fn set_wallpaper_file(&self, path: &Path) -> Result<()> {
        let len = std::fs::metadata(path)?.len() as usize;
        if len > MAX_WALLPAPER_BYTES {
            return Err(ValidationError::WallpaperTooLarge { bytes: len }.into());
        }
        let mime = mime_guess::from_path(path).first_or_octet_stream();
        let bytes = std::fs::read(path)?;
        self.set_wallpaper(&bytes, mime.essence_str())
    }

    /// Clear the image and restore both sliders.
    pub fn reset_wallpaper(&self) -> Result<()> {
        self.store.remove(KEY_WALLPAPER)?;
        self.store.set(KEY_OPACITY, &PERCENT_DEFAULT.to_string())?;
        self.store.set(KEY_BRIGHTNESS, &PERCENT_DEFAULT.to_string())
    }

    pub fn opacity(&self) -> Result<u8> {
        self.percent(KEY_OPACITY)
    }

    pub fn set_opacity(&self, value: i64) -> Result<()> {
        self.set_percent(KEY_OPACITY, "opacity", value)
    }

    pub fn brightness(&self) -> Result<u8> {
        self.percent(KEY_BRIGHTNESS)
    }

    pub fn set_brightness(&self, value: i64) -> Result<()> {
        self.set_percent(KEY_BRIGHTNESS, "brightness", value)
    }

    fn percent(&self, key: &str) -> Result<u8> {
        let raw = self.store.get(key)?;
        let value = match raw.as_deref().map(str::trim).map(str::parse::<u8>) {
            Some(Ok(v)) if v <= 100 => v,
            Some(_) => {
                warn!(key, value = ?raw, "ignoring invalid stored percentage");
                PERCENT_DEFAULT
            }
            None => PERCENT_DEFAULT,
        };
        Ok(value)
    }

    fn set_percent(&self, key: &str, field: &'static str, value: i64) -> Result<()> {
        if !(0..=100).contains(&value) {
            return Err(ValidationError::OutOfRange { field, value }.into());
        }
        self.store.set(key, &value.to_string())
    }

    /// Message timestamps are shown only when explicitly switched on.
    pub fn timestamps(&self) -> Result<bool> {
        Ok(self.store.get(KEY_TIMESTAMPS)?.as_deref() == Some("1"))
    }

    pub fn set_timestamps(&self, on: bool) -> Result<()> {
        self.store.set(KEY_TIMESTAMPS, if on { "1" } else { "0" })
    }

    /// Peer review is on unless explicitly switched off.
    pub fn peer_review(&self) -> Result<bool> {
        Ok(match self.store.get(KEY_PEER_REVIEW)? {
            Some(v) => v == "1",
            None => true,
        })
    }

    pub fn set_peer_review(&self, on: bool) -> Result<()> {
        self.store.set(KEY_PEER_REVIEW, if on { "1" } else { "0" })
    }

    pub fn snapshot(&self) -> Result<PreferencesSnapshot> {
        Ok(PreferencesSnapshot {
            language: self.language()?.code().to_string(),
            theme: self.theme()?,
            wallpaper_bytes: self.wallpaper()?.map(|w| w.len()),
            opacity: self.opacity()?,
            brightness: self.brightness()?,
            timestamps: self.timestamps()?,
            peer_review: self.peer_review()?,
        })
    }
}
