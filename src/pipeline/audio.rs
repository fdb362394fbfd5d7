use std::io::Cursor;

/// Sample rate of the linear16 audio Vonage delivers.
const SAMPLE_RATE: u32 = 16000;

/// True when the bytes already carry a container the transcriber accepts
/// (RIFF/WAV or EBML/WebM) rather than raw PCM.
pub fn looks_like_container(bytes: &[u8]) -> bool {
    bytes.starts_with(b"RIFF") || bytes.starts_with(&[0x1a, 0x45, 0xdf, 0xa3])
}

/// Wrap raw little-endian PCM16 (16kHz mono) in a WAV container.
///
/// A trailing odd byte is dropped rather than rejected; truncated webhook
/// payloads should still transcribe.
pub fn pcm16_to_wav(pcm_bytes: &[u8]) -> Result<Vec<u8>, hound::Error> {
    let mut buffer = Cursor::new(Vec::new());

    let spec = hound::WavSpec {
        channels: 1,
        sample_rate: SAMPLE_RATE,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };

    let mut writer = hound::WavWriter::new(&mut buffer, spec)?;
    for chunk in pcm_bytes.chunks_exact(2) {
        writer.write_sample(i16::from_le_bytes([chunk[0], chunk[1]]))?;
    }
    writer.finalize()?;

    Ok(buffer.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wav_output_has_riff_header() {
        let pcm: Vec<u8> = (0i16..160)
            .flat_map(|s| s.to_le_bytes())
            .collect();
        let wav = pcm16_to_wav(&pcm).unwrap();
        assert!(wav.starts_with(b"RIFF"));
        assert!(looks_like_container(&wav));
    }

    #[test]
    fn odd_length_input_is_tolerated() {
        let pcm = vec![0u8; 321];
        let wav = pcm16_to_wav(&pcm).unwrap();
        assert!(wav.starts_with(b"RIFF"));
    }

    #[test]
    fn raw_pcm_is_not_a_container() {
        assert!(!looks_like_container(&[0u8; 64]));
        assert!(looks_like_container(b"RIFF....WAVE"));
    }
}
