use crate::filter::TimeWindow;
use chrono::Duration;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Display languages. Stored report text is always English.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize, clap::ValueEnum,
)]
#[serde(rename_all = "lowercase")]
pub enum Locale {
    #[default]
    En,
    Es,
}

/// Fixed UI strings for one locale.
pub struct Messages {
    pub ice_sighting: &'static str,
    pub latest: &'static str,
    pub filter_all: &'static str,
    pub filter_30m: &'static str,
    pub filter_1h: &'static str,
    pub filter_2h: &'static str,
    pub no_sightings: &'static str,
    pub no_sightings_filter: &'static str,
    pub load_failed: &'static str,
    pub offline: &'static str,
    pub location_denied: &'static str,
    pub location_required: &'static str,
    pub report_failed: &'static str,
    pub report_success: &'static str,
    pub just_now: &'static str,
    pub you_are_here: &'static str,
}

static EN: Messages = Messages {
    ice_sighting: "ICE Sighting",
    latest: "Latest",
    filter_all: "All",
    filter_30m: "30m",
    filter_1h: "1h",
    filter_2h: "2h",
    no_sightings: "No sightings to show",
    no_sightings_filter: "No sightings in this time range",
    load_failed: "Could not load sightings",
    offline: "You are offline",
    location_denied: "Location access denied",
    location_required: "Location access is required to report a sighting.",
    report_failed: "Failed to submit report. Please try again.",
    report_success: "Report submitted!",
    just_now: "now",
    you_are_here: "You are here",
};

static ES: Messages = Messages {
    ice_sighting: "Avistamiento de ICE",
    latest: "Último",
    filter_all: "Todo",
    filter_30m: "30m",
    filter_1h: "1h",
    filter_2h: "2h",
    no_sightings: "No hay avistamientos",
    no_sightings_filter: "No hay avistamientos en este rango de tiempo",
    load_failed: "No se pudieron cargar los avistamientos",
    offline: "Sin conexión",
    location_denied: "Acceso a ubicación denegado",
    location_required: "Se requiere acceso a la ubicación para reportar un avistamiento.",
    report_failed: "No se pudo enviar el reporte. Inténtalo de nuevo.",
    report_success: "¡Reporte enviado!",
    just_now: "ahora",
    you_are_here: "Estás aquí",
};

impl Locale {
    /// The language report text is stored in.
    pub const SOURCE: Locale = Locale::En;

    pub fn code(&self) -> &'static str {
        match self {
            Locale::En => "en",
            Locale::Es => "es",
        }
    }

    pub fn messages(&self) -> &'static Messages {
        match self {
            Locale::En => &EN,
            Locale::Es => &ES,
        }
    }

    pub fn ice_sightings(&self, n: usize) -> String {
        match self {
            Locale::En => format!("{n} ICE Sightings"),
            Locale::Es => format!("{n} Avistamientos de ICE"),
        }
    }

    pub fn more(&self, n: usize) -> String {
        match self {
            Locale::En => format!("+{n} more"),
            Locale::Es => format!("+{n} más"),
        }
    }

    pub fn cooldown(&self, mins: u64) -> String {
        let plural = if mins != 1 { "s" } else { "" };
        match self {
            Locale::En => format!("Please wait {mins} more minute{plural} before reporting again."),
            Locale::Es => format!("Espera {mins} minuto{plural} más antes de reportar de nuevo."),
        }
    }

    pub fn window_label(&self, window: TimeWindow) -> &'static str {
        let m = self.messages();
        match window {
            TimeWindow::All => m.filter_all,
            TimeWindow::ThirtyMinutes => m.filter_30m,
            TimeWindow::OneHour => m.filter_1h,
            TimeWindow::TwoHours => m.filter_2h,
        }
    }

    /// Compact age label: `now`, `12m`, `3h`.
    pub fn relative_age(&self, age: Duration) -> String {
        let minutes = age.num_minutes();
        if minutes < 1 {
            self.messages().just_now.to_string()
        } else if minutes < 60 {
            format!("{minutes}m")
        } else {
            format!("{}h", age.num_hours())
        }
    }
}

impl fmt::Display for Locale {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

impl FromStr for Locale {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "en" => Ok(Locale::En),
            "es" => Ok(Locale::Es),
            other => Err(format!("unsupported locale '{other}'")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_relative_age_labels() {
        let en = Locale::En;
        assert_eq!(en.relative_age(Duration::seconds(30)), "now");
        assert_eq!(en.relative_age(Duration::seconds(-5)), "now");
        assert_eq!(en.relative_age(Duration::minutes(12)), "12m");
        assert_eq!(en.relative_age(Duration::minutes(135)), "2h");
        assert_eq!(Locale::Es.relative_age(Duration::seconds(10)), "ahora");
    }

    #[test]
    fn test_cooldown_pluralization() {
        assert_eq!(
            Locale::En.cooldown(1),
            "Please wait 1 more minute before reporting again."
        );
        assert_eq!(
            Locale::Es.cooldown(3),
            "Espera 3 minutos más antes de reportar de nuevo."
        );
    }

    #[test]
    fn test_parse_locale() {
        assert_eq!("ES".parse::<Locale>().unwrap(), Locale::Es);
        assert!("fr".parse::<Locale>().is_err());
        assert_eq!(Locale::SOURCE.code(), "en");
    }

    #[test]
    fn test_counts() {
        assert_eq!(Locale::En.ice_sightings(4), "4 ICE Sightings");
        assert_eq!(Locale::Es.more(2), "+2 más");
        assert_eq!(Locale::Es.window_label(TimeWindow::All), "Todo");
    }
}
