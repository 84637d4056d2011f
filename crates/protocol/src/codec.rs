//! Text <-> Befehl
//!
//! Zeilenformat:
//!   `<sequenz-id> <art> <arg0> <arg1> ...`
//!
//! Trennzeichen ist genau ein Leerzeichen. Sonderzeichen in Argumenten
//! werden mit Backslash escaped:
//!   \s = Leerzeichen, \n = Newline, \r = Carriage Return, \\ = Backslash
//!
//! Ein leeres Argument steht als leerer Abschnitt zwischen zwei
//! Trennzeichen. Damit ist `decode_line(&encode_line(c)) == c` fuer jeden
//! wohlgeformten Befehl.

use crate::command::{BefehlsArt, Command, SequenceId};
use crate::error::{ProtokollFehler, ProtokollResult};

/// Dekodiert eine Befehlszeile (ein abschliessendes `\n` bzw. `\r\n` wird ignoriert)
pub fn decode_line(zeile: &str) -> ProtokollResult<Command> {
    let zeile = zeile
        .strip_suffix('\n')
        .map(|z| z.strip_suffix('\r').unwrap_or(z))
        .unwrap_or(zeile);
    if zeile.is_empty() {
        return Err(ProtokollFehler::LeereZeile);
    }

    let mut teile = zeile.split(' ');

    let seq_token = teile.next().unwrap_or_default();
    let seq = parse_sequenz(seq_token)?;

    let art_token = teile.next().ok_or(ProtokollFehler::FehlendeArt)?;
    let art = BefehlsArt::aus_tag(art_token)
        .ok_or_else(|| ProtokollFehler::UnbekannteArt(art_token.to_string()))?;

    let argv = teile.map(decode_arg).collect::<ProtokollResult<Vec<_>>>()?;

    let befehl = Command::neu(art, seq, argv);
    if !befehl.ist_wohlgeformt() {
        return Err(ProtokollFehler::AnfrageOhneArgumente);
    }
    Ok(befehl)
}

/// Kodiert einen Befehl als Zeile (ohne abschliessendes Newline)
pub fn encode_line(befehl: &Command) -> String {
    let mut zeile = format!("{} {}", befehl.seq(), befehl.art().tag());
    for arg in befehl.argv() {
        zeile.push(' ');
        zeile.push_str(&encode_arg(arg));
    }
    zeile
}

impl std::fmt::Display for Command {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&encode_line(self))
    }
}

/// Sequenz-IDs sind reine Dezimalziffern ohne Vorzeichen
fn parse_sequenz(token: &str) -> ProtokollResult<SequenceId> {
    if token.is_empty() || !token.bytes().all(|b| b.is_ascii_digit()) {
        return Err(ProtokollFehler::UngueltigeSequenz(token.to_string()));
    }
    token
        .parse::<u64>()
        .map(SequenceId)
        .map_err(|_| ProtokollFehler::UngueltigeSequenz(token.to_string()))
}

/// Kodiert ein Argument fuer die Ausgabe (Escape-Sequenzen einfuegen)
pub fn encode_arg(s: &str) -> String {
    let mut result = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '\\' => result.push_str("\\\\"),
            ' ' => result.push_str("\\s"),
            '\n' => result.push_str("\\n"),
            '\r' => result.push_str("\\r"),
            other => result.push(other),
        }
    }
    result
}

/// Dekodiert Escape-Sequenzen in einem Argument
///
/// Unbekannte Sequenzen sind ein Protokollfehler, sonst waere das
/// Escaping nicht umkehrbar.
pub fn decode_arg(s: &str) -> ProtokollResult<String> {
    let mut result = String::with_capacity(s.len());
    let mut chars = s.chars();

    while let Some(c) = chars.next() {
        if c != '\\' {
            result.push(c);
            continue;
        }
        match chars.next() {
            Some('s') => result.push(' '),
            Some('n') => result.push('\n'),
            Some('r') => result.push('\r'),
            Some('\\') => result.push('\\'),
            _ => return Err(ProtokollFehler::UngueltigesEscape(s.to_string())),
        }
    }

    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::argv;

    #[test]
    fn antwort_mit_argumenten() {
        let cmd = decode_line("1 Response channel1 channel2").unwrap();
        assert_eq!(
            cmd,
            Command::Response {
                seq: SequenceId(1),
                argv: argv(["channel1", "channel2"]),
            }
        );
    }

    #[test]
    fn newline_wird_ignoriert() {
        let a = decode_line("5 Request ping\n").unwrap();
        let b = decode_line("5 Request ping\r\n").unwrap();
        assert_eq!(a, b);
        assert_eq!(a.name(), Some("ping"));
    }

    #[test]
    fn antwort_ohne_argumente_ist_erlaubt() {
        let cmd = decode_line("3 Approve").unwrap();
        assert_eq!(cmd.art(), BefehlsArt::Approve);
        assert!(cmd.argv().is_empty());
    }

    #[test]
    fn request_ohne_argumente_ist_fehler() {
        assert!(matches!(
            decode_line("3 Request"),
            Err(ProtokollFehler::AnfrageOhneArgumente)
        ));
    }

    #[test]
    fn ungueltige_sequenz() {
        for zeile in ["x Request ping", "-1 Request ping", "+1 Request ping", " Request ping"] {
            assert!(
                matches!(decode_line(zeile), Err(ProtokollFehler::UngueltigeSequenz(_))),
                "{zeile}"
            );
        }
        // u64-Ueberlauf
        assert!(decode_line("99999999999999999999 Response").is_err());
    }

    #[test]
    fn unbekannte_oder_fehlende_art() {
        assert!(matches!(
            decode_line("1 Reply ok"),
            Err(ProtokollFehler::UnbekannteArt(_))
        ));
        assert!(matches!(decode_line("1"), Err(ProtokollFehler::FehlendeArt)));
        assert!(matches!(decode_line(""), Err(ProtokollFehler::LeereZeile)));
    }

    #[test]
    fn escape_sequenzen() {
        let cmd = decode_line(r"2 Request say Hallo\sWelt a\\b").unwrap();
        assert_eq!(cmd.argv(), &["say", "Hallo Welt", r"a\b"]);
        assert!(matches!(
            decode_line(r"2 Request say kaputt\x"),
            Err(ProtokollFehler::UngueltigesEscape(_))
        ));
        assert!(decode_line(r"2 Request say ende\").is_err());
    }

    #[test]
    fn leere_argumente_bleiben_erhalten() {
        let cmd = Command::Request {
            seq: SequenceId(8),
            argv: argv(["auth", "bob", "", "0", "tv"]),
        };
        let zeile = encode_line(&cmd);
        assert_eq!(zeile, "8 Request auth bob  0 tv");
        assert_eq!(decode_line(&zeile).unwrap(), cmd);

        let nur_leer = Command::Response {
            seq: SequenceId(8),
            argv: argv([""]),
        };
        assert_eq!(decode_line(&encode_line(&nur_leer)).unwrap(), nur_leer);
    }

    #[test]
    fn roundtrip_mit_sonderzeichen() {
        let faelle = [
            Command::Request {
                seq: SequenceId(0),
                argv: argv(["get_channels"]),
            },
            Command::Response {
                seq: SequenceId(u64::MAX),
                argv: argv(["ok", "{\"name\":\"Das Erste HD\"}", "zeile1\nzeile2\r"]),
            },
            Command::Approve {
                seq: SequenceId(17),
                argv: vec![],
            },
            Command::Request {
                seq: SequenceId(3),
                argv: argv(["x", " ", "\\s", "ä ö ü"]),
            },
        ];
        for cmd in faelle {
            let zeile = encode_line(&cmd);
            assert!(!zeile.contains('\n'));
            assert_eq!(decode_line(&zeile).unwrap(), cmd, "{zeile}");
        }
    }

    #[test]
    fn display_entspricht_encode() {
        let cmd = Command::Approve {
            seq: SequenceId(4),
            argv: argv(["pong"]),
        };
        assert_eq!(cmd.to_string(), "4 Approve pong");
    }
}
