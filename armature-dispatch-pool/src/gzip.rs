//! Opportunistic gzip compression of outgoing request bodies.

use std::io::Write;

use flate2::write::GzEncoder;
use flate2::Compression;

/// Bodies at or below this size are never compressed -- the specification
/// draws the threshold strictly above 860 bytes.
pub const COMPRESS_THRESHOLD_BYTES: usize = 860;

/// Attempt to gzip `body`. Returns `None` ("send uncompressed") when the
/// body is at or below [`COMPRESS_THRESHOLD_BYTES`], when the encoder fails
/// for any reason, or when the compressed output is not actually smaller
/// than the input -- compression failure is never fatal, the original body
/// is simply sent as-is.
///
/// The size check mirrors the source's fixed-size `avail_out` deflate buffer
/// (`http.c`'s `arkime_http_send`): a non-shrinking deflate never reaches
/// `Z_STREAM_END` there and the compressed buffer is discarded, so an
/// incompressible body larger than the threshold must still go out
/// uncompressed rather than mislabeled `Content-Encoding: gzip`.
///
/// A fresh encoder is built per call rather than sharing one mutex-guarded
/// instance; the specification's design notes call this out as a valid
/// alternative that removes the shared-state mutex entirely.
pub(crate) fn compress(body: &[u8]) -> Option<Vec<u8>> {
    if body.len() <= COMPRESS_THRESHOLD_BYTES {
        return None;
    }

    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    if encoder.write_all(body).is_err() {
        return None;
    }
    match encoder.finish() {
        Ok(compressed) if !compressed.is_empty() && compressed.len() < body.len() => {
            Some(compressed)
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::read::GzDecoder;
    use std::io::Read;

    #[test]
    fn body_at_threshold_is_not_compressed() {
        let body = vec![b'A'; COMPRESS_THRESHOLD_BYTES];
        assert!(compress(&body).is_none());
    }

    #[test]
    fn body_above_threshold_is_compressed_and_round_trips() {
        let body = vec![b'A'; COMPRESS_THRESHOLD_BYTES + 1];
        let compressed = compress(&body).expect("should compress");
        assert!(compressed.len() < body.len());

        let mut decoder = GzDecoder::new(compressed.as_slice());
        let mut decompressed = Vec::new();
        decoder.read_to_end(&mut decompressed).unwrap();
        assert_eq!(decompressed, body);
    }

    #[test]
    fn incompressible_body_above_threshold_falls_back_to_the_original() {
        // A deterministic xorshift stream has no redundancy for gzip to
        // exploit, so the compressed output ends up larger than the input
        // once the gzip header/trailer overhead is added -- `compress` must
        // reject it rather than ship a larger, mislabeled body.
        let mut state: u32 = 0x1234_5678;
        let body: Vec<u8> = (0..COMPRESS_THRESHOLD_BYTES + 1)
            .map(|_| {
                state ^= state << 13;
                state ^= state >> 17;
                state ^= state << 5;
                (state & 0xff) as u8
            })
            .collect();

        assert!(compress(&body).is_none());
    }
}
