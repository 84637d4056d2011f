//! Wire-Format fuer TCP-Verbindungen
//!
//! Zeilenbasiert: jede Befehlszeile endet mit `\n` (ein vorangestelltes `\r`
//! wird toleriert). Der Decoder liefert die rohe Zeile, das Auswerten
//! uebernimmt der Correlator. So fuehrt eine kaputte Zeile nur zu einem
//! Protokollfehler und nicht zum Abbruch des Streams. Das gilt auch fuer
//! Zeilen, die kein gueltiges UTF-8 sind: sie kommen als
//! `Ok(Err(ProtokollFehler::UngueltigesUtf8))` aus dem Stream.
//!
//! Nur eine ueberlange Zeile beendet den Stream, weil danach keine
//! Zeilengrenze mehr sicher erkannt werden kann.

use bytes::{BufMut, BytesMut};
use std::io;
use tokio_util::codec::{Decoder, Encoder};

use crate::codec::encode_line;
use crate::command::Command;
use crate::error::{ProtokollFehler, ProtokollResult};

// ---------------------------------------------------------------------------
// Konstanten
// ---------------------------------------------------------------------------

/// Standard-maximale Zeilenlaenge (64 KiB)
pub const DEFAULT_MAX_ZEILENLAENGE: usize = 64 * 1024;

// ---------------------------------------------------------------------------
// ZeilenCodec
// ---------------------------------------------------------------------------

/// tokio-util Codec fuer den zeilenbasierten Control-Kanal
///
/// Implementiert `Decoder` (rohe Zeilen, einzeln auf UTF-8 geprueft) und `Encoder<Command>` fuer
/// `tokio_util::codec::Framed`.
///
/// ```rust,no_run
/// use tokio_util::codec::Framed;
/// use tvlink_protocol::wire::ZeilenCodec;
///
/// // let stream = TcpStream::connect(...).await?;
/// // let framed = Framed::new(stream, ZeilenCodec::new());
/// ```
#[derive(Debug, Clone)]
pub struct ZeilenCodec {
    max_zeilenlaenge: usize,
    /// Bis hierhin wurde der Puffer bereits nach `\n` durchsucht
    such_index: usize,
}

impl ZeilenCodec {
    pub fn new() -> Self {
        Self::with_max_laenge(DEFAULT_MAX_ZEILENLAENGE)
    }

    pub fn with_max_laenge(max_zeilenlaenge: usize) -> Self {
        Self {
            max_zeilenlaenge,
            such_index: 0,
        }
    }

    pub fn max_zeilenlaenge(&self) -> usize {
        self.max_zeilenlaenge
    }

    fn zu_lang(&self, laenge: usize) -> io::Error {
        io::Error::new(
            io::ErrorKind::InvalidData,
            format!(
                "Zeile zu lang: {} Bytes (Maximum: {} Bytes)",
                laenge, self.max_zeilenlaenge
            ),
        )
    }
}

impl Default for ZeilenCodec {
    fn default() -> Self {
        Self::new()
    }
}

/// Entfernt `\n` bzw. `\r\n` und prueft auf UTF-8
///
/// Ungueltige Bytes werden nicht ersetzt, die Zeile wird als ganze
/// verworfen.
fn zeile_aus_bytes(mut roh: BytesMut) -> ProtokollResult<String> {
    if roh.last() == Some(&b'\n') {
        roh.truncate(roh.len() - 1);
    }
    if roh.last() == Some(&b'\r') {
        roh.truncate(roh.len() - 1);
    }
    String::from_utf8(roh.to_vec()).map_err(|e| ProtokollFehler::UngueltigesUtf8 {
        position: e.utf8_error().valid_up_to(),
    })
}

// ---------------------------------------------------------------------------
// Decoder-Implementierung
// ---------------------------------------------------------------------------

impl Decoder for ZeilenCodec {
    /// Eine Zeile oder der Grund, warum sie verworfen wurde
    type Item = ProtokollResult<String>;
    type Error = io::Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        let newline = src[self.such_index..]
            .iter()
            .position(|b| *b == b'\n')
            .map(|pos| self.such_index + pos);

        match newline {
            Some(pos) => {
                self.such_index = 0;
                if pos > self.max_zeilenlaenge {
                    return Err(self.zu_lang(pos));
                }
                let roh = src.split_to(pos + 1);
                Ok(Some(zeile_aus_bytes(roh)))
            }
            None => {
                if src.len() > self.max_zeilenlaenge {
                    return Err(self.zu_lang(src.len()));
                }
                self.such_index = src.len();
                Ok(None)
            }
        }
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if let Some(zeile) = self.decode(src)? {
            return Ok(Some(zeile));
        }
        self.such_index = 0;
        if src.is_empty() {
            return Ok(None);
        }
        // Letzte Zeile ohne Newline vor dem Verbindungsende
        let rest = src.split_to(src.len());
        Ok(Some(zeile_aus_bytes(rest)))
    }
}

// ---------------------------------------------------------------------------
// Encoder-Implementierung
// ---------------------------------------------------------------------------

impl Encoder<Command> for ZeilenCodec {
    type Error = io::Error;

    fn encode(&mut self, item: Command, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let zeile = encode_line(&item);

        if zeile.len() > self.max_zeilenlaenge {
            return Err(self.zu_lang(zeile.len()));
        }

        dst.reserve(zeile.len() + 1);
        dst.put_slice(zeile.as_bytes());
        dst.put_u8(b'\n');
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::{argv, SequenceId};

    fn zeile(codec: &mut ZeilenCodec, buf: &mut BytesMut) -> Option<String> {
        codec.decode(buf).unwrap().map(|z| z.unwrap())
    }

    #[test]
    fn einzelne_zeile() {
        let mut codec = ZeilenCodec::new();
        let mut buf = BytesMut::from("1 Request ping\n");
        assert_eq!(zeile(&mut codec, &mut buf).as_deref(), Some("1 Request ping"));
        assert!(buf.is_empty());
    }

    #[test]
    fn teilweise_zeile_wartet() {
        let mut codec = ZeilenCodec::new();
        let mut buf = BytesMut::from("1 Requ");
        assert!(codec.decode(&mut buf).unwrap().is_none());

        buf.extend_from_slice(b"est ping\r\n2 Approve\n");
        assert_eq!(zeile(&mut codec, &mut buf).as_deref(), Some("1 Request ping"));
        assert_eq!(zeile(&mut codec, &mut buf).as_deref(), Some("2 Approve"));
        assert!(codec.decode(&mut buf).unwrap().is_none());
    }

    #[test]
    fn zu_lange_zeile_ist_fehler() {
        let mut codec = ZeilenCodec::with_max_laenge(8);
        let mut buf = BytesMut::from("123456789012");
        let fehler = codec.decode(&mut buf).unwrap_err();
        assert_eq!(fehler.kind(), io::ErrorKind::InvalidData);
    }

    #[test]
    fn letzte_zeile_bei_eof() {
        let mut codec = ZeilenCodec::new();
        let mut buf = BytesMut::from("3 Response ok");
        assert_eq!(
            codec.decode_eof(&mut buf).unwrap().map(|z| z.unwrap()).as_deref(),
            Some("3 Response ok")
        );
        assert!(codec.decode_eof(&mut buf).unwrap().is_none());
    }

    #[test]
    fn ungueltiges_utf8_verwirft_nur_die_zeile() {
        let mut codec = ZeilenCodec::new();
        let mut buf = BytesMut::from(&b"1 Request auth bob p\xffw 0 tv\n2 Request ping\n"[..]);

        let fehler = codec.decode(&mut buf).unwrap().unwrap().unwrap_err();
        assert!(matches!(fehler, ProtokollFehler::UngueltigesUtf8 { position: 20 }));

        // Die naechste Zeile wird normal gelesen
        assert_eq!(zeile(&mut codec, &mut buf).as_deref(), Some("2 Request ping"));
        assert!(buf.is_empty());
    }

    #[test]
    fn encoder_haengt_newline_an() {
        let mut codec = ZeilenCodec::new();
        let mut buf = BytesMut::new();
        let cmd = Command::Request {
            seq: SequenceId(7),
            argv: argv(["get_channels"]),
        };
        codec.encode(cmd, &mut buf).unwrap();
        assert_eq!(&buf[..], b"7 Request get_channels\n");
    }

    #[test]
    fn encoder_lehnt_zu_lange_zeile_ab() {
        let mut codec = ZeilenCodec::with_max_laenge(10);
        let mut buf = BytesMut::new();
        let cmd = Command::Response {
            seq: SequenceId(1),
            argv: argv(["sehr-langes-argument"]),
        };
        assert!(codec.encode(cmd, &mut buf).is_err());
        assert!(buf.is_empty());
    }

    #[tokio::test]
    async fn framed_ueber_duplex() {
        use futures_util::{SinkExt, StreamExt};
        use tokio_util::codec::Framed;

        let (a, b) = tokio::io::duplex(1024);
        let mut links = Framed::new(a, ZeilenCodec::new());
        let mut rechts = Framed::new(b, ZeilenCodec::new());

        links
            .send(Command::Approve {
                seq: SequenceId(2),
                argv: argv(["pong"]),
            })
            .await
            .unwrap();

        let zeile = rechts.next().await.unwrap().unwrap().unwrap();
        assert_eq!(zeile, "2 Approve pong");
    }
}
