use chrono::{DateTime, NaiveDateTime, TimeZone, Timelike, Utc};
use chrono_tz::Tz;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

const STAMP_FORMAT: &str = "%Y%m%d_%H%M%S_%3f";

/// `<name>_<YYYYMMDD>_<HHMMSS>_<mmm>` in `tz`; sorts by time for one camera
pub fn file_stem(camera_name: &str, start: SystemTime, tz: Tz) -> String {
    let local = DateTime::<Utc>::from(start).with_timezone(&tz);
    format!("{}_{}", camera_name, local.format(STAMP_FORMAT))
}

/// First stem, `base` or `base-N`, for which none of `extensions` exist in `dir`
pub async fn unique_stem(dir: &Path, base: &str, extensions: &[&str]) -> String {
    let mut suffix = 0u32;
    loop {
        let stem = if suffix == 0 {
            base.to_string()
        } else {
            format!("{}-{}", base, suffix)
        };

        let mut taken = false;
        for ext in extensions {
            if tokio::fs::metadata(dir.join(format!("{}.{}", stem, ext)))
                .await
                .is_ok()
            {
                taken = true;
                break;
            }
        }
        if !taken {
            return stem;
        }
        suffix += 1;
    }
}

/// Start of the next hour in `tz` strictly after `ts`
pub fn next_hour_boundary(ts: SystemTime, tz: Tz) -> SystemTime {
    let local = DateTime::<Utc>::from(ts).with_timezone(&tz);
    // step back by the local time into the hour; avoids rebuilding an
    // ambiguous local time during a DST fold
    let into_hour = chrono::Duration::minutes(local.minute() as i64)
        + chrono::Duration::seconds(local.second() as i64)
        + chrono::Duration::nanoseconds(local.nanosecond() as i64);

    SystemTime::from(local.with_timezone(&Utc) - into_hour + chrono::Duration::hours(1))
}

/// Capture time embedded in a recording file name, if any
pub fn parse_start_time(file_name: &str, tz: Tz) -> Option<SystemTime> {
    let stem = file_name.split('.').next()?;
    let tokens: Vec<&str> = stem.split('_').collect();

    tokens.windows(3).rev().find_map(|window| {
        let (date, time, millis) = (window[0], window[1], window[2]);
        let millis = millis.get(..3)?;
        if date.len() != 8
            || time.len() != 6
            || !date.bytes().all(|b| b.is_ascii_digit())
            || !time.bytes().all(|b| b.is_ascii_digit())
            || !millis.bytes().all(|b| b.is_ascii_digit())
        {
            return None;
        }

        let naive = NaiveDateTime::parse_from_str(&format!("{}{}", date, time), "%Y%m%d%H%M%S")
            .ok()?
            + chrono::Duration::milliseconds(millis.parse().ok()?);
        let local = tz.from_local_datetime(&naive).earliest()?;
        Some(SystemTime::from(local.with_timezone(&Utc)))
    })
}

/// Joined path for a stem and extension
pub fn path_for(dir: &Path, stem: &str, ext: &str) -> PathBuf {
    dir.join(format!("{}.{}", stem, ext))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn at(rfc3339: &str) -> SystemTime {
        SystemTime::from(DateTime::parse_from_rfc3339(rfc3339).unwrap())
    }

    #[test]
    fn test_file_stem_format() {
        let ts = at("2024-03-05T14:07:09.042Z");
        assert_eq!(file_stem("front_door", ts, Tz::UTC), "front_door_20240305_140709_042");
        assert_eq!(
            file_stem("front_door", ts, chrono_tz::Europe::Berlin),
            "front_door_20240305_150709_042"
        );
    }

    #[test]
    fn test_stems_sort_by_time() {
        let a = file_stem("cam", at("2024-03-05T09:59:59.999Z"), Tz::UTC);
        let b = file_stem("cam", at("2024-03-05T10:00:00.000Z"), Tz::UTC);
        let c = file_stem("cam", at("2024-12-01T00:00:00.000Z"), Tz::UTC);
        assert!(a < b && b < c);
    }

    #[test]
    fn test_next_hour_boundary() {
        assert_eq!(
            next_hour_boundary(at("2024-03-05T14:07:09.042Z"), Tz::UTC),
            at("2024-03-05T15:00:00Z")
        );
        // exactly on the hour rolls to the following one
        assert_eq!(
            next_hour_boundary(at("2024-03-05T15:00:00Z"), Tz::UTC),
            at("2024-03-05T16:00:00Z")
        );
        // half-hour offset zone
        assert_eq!(
            next_hour_boundary(at("2024-03-05T14:10:00Z"), chrono_tz::Asia::Kolkata),
            at("2024-03-05T14:30:00Z")
        );
    }

    #[test]
    fn test_boundary_across_dst_change() {
        // Europe/Berlin falls back at 01:00 UTC on 2024-10-27
        let tz = chrono_tz::Europe::Berlin;
        let mut ts = at("2024-10-26T23:30:00Z");
        let mut boundaries = Vec::new();
        for _ in 0..4 {
            ts = next_hour_boundary(ts, tz);
            boundaries.push(ts);
        }
        let hours: Vec<u64> = boundaries
            .windows(2)
            .map(|w| w[1].duration_since(w[0]).unwrap().as_secs())
            .collect();
        assert_eq!(hours, vec![3600, 3600, 3600]);
    }

    #[test]
    fn test_parse_start_time() {
        let ts = at("2024-03-05T14:07:09.042Z");
        assert_eq!(parse_start_time("front_door_20240305_140709_042.mjpeg", Tz::UTC), Some(ts));
        assert_eq!(parse_start_time("front_door_20240305_140709_042-2.mp4", Tz::UTC), Some(ts));
        assert_eq!(
            parse_start_time("front_door_20240305_140709_042.corrupt.mp4", Tz::UTC),
            Some(ts)
        );
        assert_eq!(
            parse_start_time("front_door_20240305_150709_042.json", chrono_tz::Europe::Berlin),
            Some(ts)
        );
        assert_eq!(parse_start_time("notes.txt", Tz::UTC), None);
        assert_eq!(parse_start_time("cam_2024_140709_042.mp4", Tz::UTC), None);
    }

    #[tokio::test]
    async fn test_unique_stem_skips_collisions() {
        let dir = TempDir::new().unwrap();
        assert_eq!(unique_stem(dir.path(), "cam_x", &["mjpeg", "mp4"]).await, "cam_x");

        std::fs::write(dir.path().join("cam_x.mp4"), b"x").unwrap();
        assert_eq!(unique_stem(dir.path(), "cam_x", &["mjpeg", "mp4"]).await, "cam_x-1");

        std::fs::write(dir.path().join("cam_x-1.mjpeg"), b"x").unwrap();
        assert_eq!(unique_stem(dir.path(), "cam_x", &["mjpeg", "mp4"]).await, "cam_x-2");
    }
}
