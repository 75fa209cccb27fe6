use bytes::{Buf, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use crate::serial::LineTerminator;

/// Splits the incoming byte stream into lines and appends the configured
/// terminator to outgoing ones.
///
/// Decoding always splits on `\n` and drops a trailing `\r` if present,
/// so a device configured for `\r\n` that occasionally emits bare `\n`
/// still frames correctly. Bad utf8 is replaced, not rejected; the JSON
/// decode downstream is the arbiter of whether a line is usable.
#[derive(Debug, Clone)]
pub(crate) struct LinesCodec {
    /// How far into the buffer we have already scanned for a newline.
    cursor: usize,

    terminator: LineTerminator,
}

impl LinesCodec {
    pub(crate) fn new(terminator: LineTerminator) -> Self {
        Self {
            cursor: 0,
            terminator,
        }
    }
}

impl Decoder for LinesCodec {
    type Item = String;
    type Error = std::io::Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        let read_to = src.len();
        let look_at = &src[self.cursor..read_to];

        if let Some(position) = look_at.iter().position(|&byte| byte == b'\n') {
            // The scan may have started late (from the cursor), so the
            // position within the whole buffer has to be adjusted.
            let actual_position = self.cursor + position;
            self.cursor = 0;

            let mut line = src.split_to(actual_position);

            // Advance past the newline itself.
            src.advance(1);

            if line.last() == Some(&b'\r') {
                line.truncate(line.len() - 1);
            }

            Ok(Some(String::from_utf8_lossy(&line).to_string()))
        } else {
            // No full frame yet. We'll be handed the same buffer again,
            // possibly grown, so remember where the scan got to.
            self.cursor = read_to;

            Ok(None)
        }
    }
}

impl Encoder<String> for LinesCodec {
    type Error = std::io::Error;

    fn encode(&mut self, item: String, dst: &mut BytesMut) -> Result<(), Self::Error> {
        dst.extend_from_slice(item.as_bytes());
        dst.extend_from_slice(self.terminator.as_bytes());

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    fn decode_all(codec: &mut LinesCodec, src: &mut BytesMut) -> Vec<String> {
        let mut lines = vec![];
        while let Some(line) = codec.decode(src).unwrap() {
            lines.push(line);
        }
        lines
    }

    #[test]
    fn splits_lines() {
        let mut codec = LinesCodec::new(LineTerminator::Lf);
        let mut src = BytesMut::from(&b"one\ntwo\nthree"[..]);

        assert_eq!(decode_all(&mut codec, &mut src), vec!["one", "two"]);
        assert_eq!(&src[..], b"three");
    }

    #[test]
    fn partial_frames_complete_as_bytes_arrive() {
        let mut codec = LinesCodec::new(LineTerminator::Lf);
        let mut src = BytesMut::from(&b"{\"temp\":"[..]);

        assert_eq!(codec.decode(&mut src).unwrap(), None);

        src.extend_from_slice(b"21.5}\n");
        assert_eq!(
            codec.decode(&mut src).unwrap(),
            Some("{\"temp\":21.5}".to_string())
        );
    }

    #[test]
    fn trailing_carriage_return_is_stripped() {
        let mut codec = LinesCodec::new(LineTerminator::CrLf);
        let mut src = BytesMut::from(&b"one\r\ntwo\n"[..]);

        assert_eq!(decode_all(&mut codec, &mut src), vec!["one", "two"]);
    }

    #[test]
    fn encode_appends_terminator() {
        let mut codec = LinesCodec::new(LineTerminator::CrLf);
        let mut dst = BytesMut::new();

        codec.encode("pwm:128".to_string(), &mut dst).unwrap();
        assert_eq!(&dst[..], b"pwm:128\r\n");

        let mut codec = LinesCodec::new(LineTerminator::Lf);
        let mut dst = BytesMut::new();

        codec.encode("pwm:128".to_string(), &mut dst).unwrap();
        assert_eq!(&dst[..], b"pwm:128\n");
    }

    #[test]
    fn empty_lines_are_yielded() {
        let mut codec = LinesCodec::new(LineTerminator::Lf);
        let mut src = BytesMut::from(&b"\n\nx\n"[..]);

        assert_eq!(decode_all(&mut codec, &mut src), vec!["", "", "x"]);
    }
}
