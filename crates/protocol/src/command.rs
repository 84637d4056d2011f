//! Strukturierte Befehle des Control-Kanals
//!
//! Ein Befehl ist genau eine von drei Arten. `Request` startet einen
//! Austausch, `Response` und `Approve` beantworten ihn mit derselben
//! Sequenz-ID.

use serde::{Deserialize, Serialize};

/// Sequenz-ID einer Anfrage, eindeutig pro Verbindung
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SequenceId(pub u64);

impl SequenceId {
    pub fn inner(&self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for SequenceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Art eines Befehls, ohne Nutzdaten
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BefehlsArt {
    Request,
    Response,
    Approve,
}

impl BefehlsArt {
    /// Token auf dem Draht
    pub fn tag(&self) -> &'static str {
        match self {
            Self::Request => "Request",
            Self::Response => "Response",
            Self::Approve => "Approve",
        }
    }

    pub fn aus_tag(tag: &str) -> Option<Self> {
        match tag {
            "Request" => Some(Self::Request),
            "Response" => Some(Self::Response),
            "Approve" => Some(Self::Approve),
            _ => None,
        }
    }
}

impl std::fmt::Display for BefehlsArt {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.tag())
    }
}

/// Ein Befehl mit Sequenz-ID und Argumentvektor
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Request { seq: SequenceId, argv: Vec<String> },
    Response { seq: SequenceId, argv: Vec<String> },
    Approve { seq: SequenceId, argv: Vec<String> },
}

impl Command {
    pub fn neu(art: BefehlsArt, seq: SequenceId, argv: Vec<String>) -> Self {
        match art {
            BefehlsArt::Request => Self::Request { seq, argv },
            BefehlsArt::Response => Self::Response { seq, argv },
            BefehlsArt::Approve => Self::Approve { seq, argv },
        }
    }

    pub fn seq(&self) -> SequenceId {
        match self {
            Self::Request { seq, .. } | Self::Response { seq, .. } | Self::Approve { seq, .. } => {
                *seq
            }
        }
    }

    pub fn art(&self) -> BefehlsArt {
        match self {
            Self::Request { .. } => BefehlsArt::Request,
            Self::Response { .. } => BefehlsArt::Response,
            Self::Approve { .. } => BefehlsArt::Approve,
        }
    }

    pub fn argv(&self) -> &[String] {
        match self {
            Self::Request { argv, .. } | Self::Response { argv, .. } | Self::Approve { argv, .. } => {
                argv
            }
        }
    }

    pub fn into_argv(self) -> Vec<String> {
        match self {
            Self::Request { argv, .. } | Self::Response { argv, .. } | Self::Approve { argv, .. } => {
                argv
            }
        }
    }

    /// Befehlsname einer Anfrage (erstes Argument)
    pub fn name(&self) -> Option<&str> {
        self.argv().first().map(String::as_str)
    }

    /// Requests brauchen mindestens ein Argument, Antworten nicht
    pub fn ist_wohlgeformt(&self) -> bool {
        match self {
            Self::Request { argv, .. } => !argv.is_empty(),
            _ => true,
        }
    }
}

/// Baut einen Argumentvektor aus String-Slices
pub fn argv<I, S>(teile: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    teile.into_iter().map(Into::into).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tags_sind_stabil() {
        for art in [BefehlsArt::Request, BefehlsArt::Response, BefehlsArt::Approve] {
            assert_eq!(BefehlsArt::aus_tag(art.tag()), Some(art));
        }
        assert_eq!(BefehlsArt::aus_tag("request"), None);
        assert_eq!(BefehlsArt::aus_tag(""), None);
    }

    #[test]
    fn request_ohne_argumente_ist_nicht_wohlgeformt() {
        let leer = Command::Request {
            seq: SequenceId(1),
            argv: vec![],
        };
        assert!(!leer.ist_wohlgeformt());

        let antwort = Command::Response {
            seq: SequenceId(1),
            argv: vec![],
        };
        assert!(antwort.ist_wohlgeformt());
    }

    #[test]
    fn zugriffe() {
        let cmd = Command::neu(BefehlsArt::Approve, SequenceId(9), argv(["pong"]));
        assert_eq!(cmd.seq(), SequenceId(9));
        assert_eq!(cmd.art(), BefehlsArt::Approve);
        assert_eq!(cmd.name(), Some("pong"));
        assert_eq!(cmd.into_argv(), vec!["pong".to_string()]);
    }
}
