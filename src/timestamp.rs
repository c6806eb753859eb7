/// Formats `samples` at `sample_rate` as `hh:mm:ss.mmm`.
pub fn time_str(samples: u64, sample_rate: u32) -> String {
    let ms = samples * 1000 / sample_rate.max(1) as u64;
    let hours = ms / 3_600_000;
    let minutes = ms % 3_600_000 / 60_000;
    let seconds = ms % 60_000 / 1000;
    let milliseconds = ms % 1000;

    format!(
        "{hours:0width$}:{minutes:02}:{seconds:02}.{milliseconds:03}",
        width = if hours >= 100 { 0 } else { 2 }
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn formats_sample_counts() {
        assert_eq!(time_str(0, 48000), "00:00:00.000");
        assert_eq!(time_str(48000 * 61 + 24000, 48000), "00:01:01.500");
        assert_eq!(time_str(44100 * 3600 * 101, 44100), "101:00:00.000");
    }
}
