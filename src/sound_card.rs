use std::fmt;

/// Which side of the relay a device or stream belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    Input,
    Output,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Input => write!(f, "input"),
            Direction::Output => write!(f, "output"),
        }
    }
}

/// Position of a device within its host's enumeration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DeviceId(pub usize);

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Host audio API a device was enumerated from.
///
/// The platform layer maps its own host identifiers onto this closed set at the
/// boundary; nothing in the engine depends on platform constants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HostApi {
    PulseAudio,
    Alsa,
    Jack,
    CoreAudio,
    Wasapi,
    Asio,
    DirectSound,
    Oss,
    Simulated,
    Unknown,
}

impl HostApi {
    /// Map a host name as reported by the platform layer (case-insensitive).
    pub fn from_host_name(name: &str) -> Self {
        match name.to_ascii_lowercase().as_str() {
            "pulseaudio" | "pulse" => HostApi::PulseAudio,
            "alsa" => HostApi::Alsa,
            "jack" => HostApi::Jack,
            "coreaudio" => HostApi::CoreAudio,
            "wasapi" => HostApi::Wasapi,
            "asio" => HostApi::Asio,
            "directsound" => HostApi::DirectSound,
            "oss" => HostApi::Oss,
            "simulated" => HostApi::Simulated,
            _ => HostApi::Unknown,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            HostApi::PulseAudio => "PulseAudio",
            HostApi::Alsa => "ALSA",
            HostApi::Jack => "JACK",
            HostApi::CoreAudio => "CoreAudio",
            HostApi::Wasapi => "WASAPI",
            HostApi::Asio => "ASIO",
            HostApi::DirectSound => "DirectSound",
            HostApi::Oss => "OSS",
            HostApi::Simulated => "Simulated",
            HostApi::Unknown => "Unknown",
        }
    }
}

impl fmt::Display for HostApi {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Snapshot of one enumerated device. Compared by full value: a change to any
/// field counts as a different device.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SoundCard {
    pub id: DeviceId,
    pub name: String,
    pub channel_count: u16,
    pub host_api: HostApi,
}

impl SoundCard {
    /// Persisted identity: `[id][host_api] name`.
    pub fn serialise(&self) -> String {
        format!("[{}][{}] {}", self.id, self.host_api, self.name)
    }
}

impl fmt::Display for SoundCard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.serialise())
    }
}

/// Re-resolve a persisted identity against a fresh enumeration.
/// Returns `None` for an empty identity or when no device matches.
pub fn resolve(cards: &[SoundCard], identity: &str) -> Option<SoundCard> {
    if identity.is_empty() {
        return None;
    }
    cards.iter().find(|c| c.serialise() == identity).cloned()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn card(id: usize, name: &str) -> SoundCard {
        SoundCard {
            id: DeviceId(id),
            name: name.into(),
            channel_count: 2,
            host_api: HostApi::Alsa,
        }
    }

    #[test]
    fn serialise_format() {
        assert_eq!(card(3, "USB Audio CODEC").serialise(), "[3][ALSA] USB Audio CODEC");
    }

    #[test]
    fn resolve_finds_matching_card() {
        let cards = vec![card(0, "Built-in"), card(1, "USB Audio CODEC")];
        let found = resolve(&cards, "[1][ALSA] USB Audio CODEC").unwrap();
        assert_eq!(found, cards[1]);
    }

    #[test]
    fn resolve_unknown_or_empty_is_none() {
        let cards = vec![card(0, "Built-in")];
        assert!(resolve(&cards, "").is_none());
        assert!(resolve(&cards, "[0][JACK] Built-in").is_none());
        assert!(resolve(&cards, "[5][ALSA] Built-in").is_none());
    }

    #[test]
    fn equality_covers_every_field() {
        let a = card(0, "Built-in");
        let mut b = a.clone();
        assert_eq!(a, b);
        b.channel_count = 1;
        assert_ne!(a, b);
        let mut c = a.clone();
        c.host_api = HostApi::PulseAudio;
        assert_ne!(a, c);
    }

    #[test]
    fn host_api_from_name() {
        assert_eq!(HostApi::from_host_name("ALSA"), HostApi::Alsa);
        assert_eq!(HostApi::from_host_name("Jack"), HostApi::Jack);
        assert_eq!(HostApi::from_host_name("WASAPI"), HostApi::Wasapi);
        assert_eq!(HostApi::from_host_name("Emscripten"), HostApi::Unknown);
    }
}
