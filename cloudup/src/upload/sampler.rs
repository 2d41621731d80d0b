use std::str::FromStr;
use std::time::Instant;

use serde::{Deserialize, Serialize};

use super::item::{UploadItem, UploadStatus};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SpeedMode {
    #[default]
    Instant,
    Average,
}

impl FromStr for SpeedMode {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "instant" => Ok(SpeedMode::Instant),
            "average" => Ok(SpeedMode::Average),
            other => Err(format!("unknown speed mode: {other}")),
        }
    }
}

pub fn sample(items: &mut [UploadItem], now: Instant) {
    for item in items
        .iter_mut()
        .filter(|item| item.status == UploadStatus::Uploading)
    {
        let Some(start) = item.start_time else {
            item.start_time = Some(now);
            item.last_time = Some(now);
            item.last_size = item.uploaded_size;
            continue;
        };
        let last = item.last_time.unwrap_or(start);
        let window = now.saturating_duration_since(last).as_secs_f64();
        if window > 0.0 {
            let delta = item.uploaded_size.saturating_sub(item.last_size);
            item.instant_speed = delta as f64 / window;
        }
        let elapsed = now.saturating_duration_since(start).as_secs_f64();
        if elapsed > 0.0 {
            item.average_speed = item.uploaded_size as f64 / elapsed;
        }
        item.last_time = Some(now);
        item.last_size = item.uploaded_size;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::upload::item::FileHandle;
    use std::time::Duration;

    fn uploading(uploaded: u64) -> UploadItem {
        let mut item = UploadItem::new(
            1,
            FileHandle::from_bytes("a", vec![0u8; 4096]),
            "a".into(),
            "/".into(),
            None,
            false,
        );
        item.status = UploadStatus::Uploading;
        item.uploaded_size = uploaded;
        item
    }

    #[test]
    fn first_sample_only_starts_the_clock() {
        let now = Instant::now();
        let mut items = vec![uploading(100)];
        sample(&mut items, now);
        assert_eq!(items[0].start_time, Some(now));
        assert_eq!(items[0].last_size, 100);
        assert_eq!(items[0].instant_speed, 0.0);
    }

    #[test]
    fn computes_instant_and_average_speed() {
        let start = Instant::now();
        let mut items = vec![uploading(0)];
        sample(&mut items, start);

        items[0].uploaded_size = 1000;
        sample(&mut items, start + Duration::from_secs(1));
        assert!((items[0].instant_speed - 1000.0).abs() < 1e-6);

        items[0].uploaded_size = 1500;
        sample(&mut items, start + Duration::from_secs(2));
        assert!((items[0].instant_speed - 500.0).abs() < 1e-6);
        assert!((items[0].average_speed - 750.0).abs() < 1e-6);
        assert_eq!(items[0].display_speed(SpeedMode::Average), items[0].average_speed);
    }

    #[test]
    fn ignores_items_that_are_not_uploading() {
        let mut item = uploading(10);
        item.status = UploadStatus::Pending;
        let mut items = vec![item];
        sample(&mut items, Instant::now());
        assert!(items[0].start_time.is_none());
    }

    #[test]
    fn parses_speed_mode() {
        assert_eq!("average".parse::<SpeedMode>(), Ok(SpeedMode::Average));
        assert!("fast".parse::<SpeedMode>().is_err());
    }
}
