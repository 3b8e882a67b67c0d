//! User-facing geospatial parameters consumed by the request builders.

use std::fmt;
use std::str::FromStr;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::DownloadError;
use crate::format::MimeType;

/// Coordinate reference system, identified by its EPSG code
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Crs(pub u32);

impl Crs {
    pub const WGS84: Crs = Crs(4326);
    pub const POP_WEB: Crs = Crs(3857);

    /// OGC notation, e.g. `EPSG:4326`
    pub fn ogc_string(&self) -> String {
        format!("EPSG:{}", self.0)
    }
}

impl Default for Crs {
    fn default() -> Self {
        Crs::WGS84
    }
}

impl FromStr for Crs {
    type Err = DownloadError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let code = s.trim();
        let code = code
            .strip_prefix("EPSG:")
            .or_else(|| code.strip_prefix("epsg:"))
            .unwrap_or(code);
        code.parse::<u32>()
            .map(Crs)
            .map_err(|_| DownloadError::InvalidRequest(format!("invalid CRS: {s}")))
    }
}

/// Axis-aligned bounding box in the given CRS
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BBox {
    pub min_x: f64,
    pub min_y: f64,
    pub max_x: f64,
    pub max_y: f64,
    pub crs: Crs,
}

impl BBox {
    pub fn new(min_x: f64, min_y: f64, max_x: f64, max_y: f64, crs: Crs) -> Result<Self, DownloadError> {
        let coords = [min_x, min_y, max_x, max_y];
        if coords.iter().any(|c| !c.is_finite()) {
            return Err(DownloadError::InvalidRequest(
                "bounding box coordinates must be finite".to_string(),
            ));
        }
        if min_x >= max_x || min_y >= max_y {
            return Err(DownloadError::InvalidRequest(format!(
                "degenerate bounding box {min_x},{min_y},{max_x},{max_y}"
            )));
        }
        Ok(Self {
            min_x,
            min_y,
            max_x,
            max_y,
            crs,
        })
    }

    /// `min_x,min_y,max_x,max_y` as used in OGC `BBOX` parameters
    pub fn ogc_string(&self) -> String {
        format!("{},{},{},{}", self.min_x, self.min_y, self.max_x, self.max_y)
    }
}

impl FromStr for BBox {
    type Err = DownloadError;

    /// Parses `min_x,min_y,max_x,max_y` in WGS84
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let coords = s
            .split(',')
            .map(|c| c.trim().parse::<f64>())
            .collect::<Result<Vec<_>, _>>()
            .map_err(|_| DownloadError::InvalidRequest(format!("invalid bounding box: {s}")))?;

        match coords.as_slice() {
            [min_x, min_y, max_x, max_y] => BBox::new(*min_x, *min_y, *max_x, *max_y, Crs::WGS84),
            _ => Err(DownloadError::InvalidRequest(format!(
                "bounding box needs 4 coordinates, got {}",
                coords.len()
            ))),
        }
    }
}

/// Inclusive date interval
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeRange {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl TimeRange {
    pub fn new(start: NaiveDate, end: NaiveDate) -> Result<Self, DownloadError> {
        if end < start {
            return Err(DownloadError::InvalidRequest(format!(
                "time range ends ({end}) before it starts ({start})"
            )));
        }
        Ok(Self { start, end })
    }

    pub fn day(date: NaiveDate) -> Self {
        Self {
            start: date,
            end: date,
        }
    }
}

impl fmt::Display for TimeRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{}",
            self.start.format("%Y-%m-%d"),
            self.end.format("%Y-%m-%d")
        )
    }
}

impl FromStr for TimeRange {
    type Err = DownloadError;

    /// Accepts `YYYY-MM-DD` or `YYYY-MM-DD/YYYY-MM-DD`
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parse = |d: &str| {
            NaiveDate::parse_from_str(d.trim(), "%Y-%m-%d")
                .map_err(|e| DownloadError::InvalidRequest(format!("invalid date '{d}': {e}")))
        };
        match s.split_once('/') {
            Some((start, end)) => TimeRange::new(parse(start)?, parse(end)?),
            None => Ok(TimeRange::day(parse(s)?)),
        }
    }
}

/// Parameters a request builder turns into a [`crate::RequestDescriptor`].
///
/// Which fields are required depends on the provider; builders reject
/// missing ones with [`DownloadError::InvalidRequest`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RequestParams {
    pub layer: Option<String>,
    pub bbox: Option<BBox>,
    pub time: Option<TimeRange>,
    pub format: Option<MimeType>,
    /// Output size in pixels (WMS)
    pub size: Option<(u32, u32)>,
    /// Output resolution, e.g. `10m` (WCS/FIS)
    pub resolution: Option<String>,
    /// Sentinel-2 tile name such as `T33UUP` or `33UUP` (AWS)
    pub tile: Option<String>,
    /// Sentinel-2 product identifier (AWS-safe)
    pub product: Option<String>,
    /// File inside the tile or product folder, e.g. `B01.jp2` (AWS)
    pub file: Option<String>,
    /// Acquisition index within the day (AWS)
    pub aws_index: Option<u32>,
    /// Provider-specific extras passed through verbatim
    pub extra: Vec<(String, String)>,
}

impl RequestParams {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn layer(mut self, layer: impl Into<String>) -> Self {
        self.layer = Some(layer.into());
        self
    }

    pub fn bbox(mut self, bbox: BBox) -> Self {
        self.bbox = Some(bbox);
        self
    }

    pub fn time(mut self, time: TimeRange) -> Self {
        self.time = Some(time);
        self
    }

    pub fn format(mut self, format: MimeType) -> Self {
        self.format = Some(format);
        self
    }

    pub fn size(mut self, width: u32, height: u32) -> Self {
        self.size = Some((width, height));
        self
    }

    pub fn resolution(mut self, resolution: impl Into<String>) -> Self {
        self.resolution = Some(resolution.into());
        self
    }

    pub fn tile(mut self, tile: impl Into<String>) -> Self {
        self.tile = Some(tile.into());
        self
    }

    pub fn product(mut self, product: impl Into<String>) -> Self {
        self.product = Some(product.into());
        self
    }

    pub fn file(mut self, file: impl Into<String>) -> Self {
        self.file = Some(file.into());
        self
    }

    pub fn aws_index(mut self, index: u32) -> Self {
        self.aws_index = Some(index);
        self
    }

    pub fn extra(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.extra.push((name.into(), value.into()));
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bbox_parsing() {
        let bbox: BBox = "10, 45, 11, 46".parse().unwrap();
        assert_eq!(bbox.ogc_string(), "10,45,11,46");
        assert_eq!(bbox.crs, Crs::WGS84);

        assert!("10,45,11".parse::<BBox>().is_err());
        assert!("11,45,10,46".parse::<BBox>().is_err());
        assert!("a,b,c,d".parse::<BBox>().is_err());
    }

    #[test]
    fn test_time_range_parsing() {
        let day: TimeRange = "2020-01-01".parse().unwrap();
        assert_eq!(day.to_string(), "2020-01-01/2020-01-01");

        let range: TimeRange = "2020-01-01/2020-02-15".parse().unwrap();
        assert_eq!(range.end, NaiveDate::from_ymd_opt(2020, 2, 15).unwrap());

        assert!("2020-02-15/2020-01-01".parse::<TimeRange>().is_err());
        assert!("yesterday".parse::<TimeRange>().is_err());
    }

    #[test]
    fn test_crs_parsing() {
        assert_eq!("EPSG:3857".parse::<Crs>().unwrap(), Crs::POP_WEB);
        assert_eq!("4326".parse::<Crs>().unwrap().ogc_string(), "EPSG:4326");
        assert!("EPSG:x".parse::<Crs>().is_err());
    }
}
