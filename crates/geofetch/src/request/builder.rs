//! # Request Builders
//!
//! Turn user-facing [`RequestParams`] into a [`RequestDescriptor`]. One builder
//! per provider dialect; [`Provider`] selects one at construction time so the
//! rest of the engine never branches on the dialect.

use chrono::Datelike;

use crate::DownloadError;
use crate::format::MimeType;
use crate::request::{RequestDescriptor, RequestParams};

pub const DEFAULT_SERVICE_URL: &str = "https://services.sentinel-hub.com";
pub const DEFAULT_L1C_BUCKET: &str = "sentinel-s2-l1c";
pub const DEFAULT_AWS_REGION: &str = "eu-central-1";

const WMS_VERSION: &str = "1.3.0";
const WCS_VERSION: &str = "1.1.2";

/// Capability shared by every provider dialect
pub trait RequestBuilder {
    /// Build the descriptor of one fetch
    fn build(&self, params: &RequestParams) -> Result<RequestDescriptor, DownloadError>;
}

fn missing(field: &str, provider: &str) -> DownloadError {
    DownloadError::InvalidRequest(format!("{provider} request requires `{field}`"))
}

fn ogc_endpoint(base_url: &str, service: &str, instance_id: &str) -> Result<String, DownloadError> {
    let instance_id = instance_id.trim();
    if instance_id.is_empty() {
        return Err(DownloadError::InvalidRequest(format!(
            "{service} requests require an instance id"
        )));
    }
    Ok(format!(
        "{}/ogc/{service}/{instance_id}",
        base_url.trim_end_matches('/')
    ))
}

/// Common part of every OGC-style service builder
#[derive(Debug, Clone)]
pub struct ServiceEndpoint {
    pub base_url: String,
    pub instance_id: String,
}

impl ServiceEndpoint {
    pub fn new(instance_id: impl Into<String>) -> Self {
        Self {
            base_url: DEFAULT_SERVICE_URL.to_string(),
            instance_id: instance_id.into(),
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }
}

/// Shared OGC fields: layer, bbox, CRS and time
fn ogc_descriptor(
    endpoint: &ServiceEndpoint,
    service: &str,
    params: &RequestParams,
    format: MimeType,
) -> Result<RequestDescriptor, DownloadError> {
    let provider = service.to_ascii_uppercase();
    let layer = params
        .layer
        .as_deref()
        .ok_or_else(|| missing("layer", &provider))?;
    let bbox = params.bbox.ok_or_else(|| missing("bbox", &provider))?;
    let url = ogc_endpoint(&endpoint.base_url, service, &endpoint.instance_id)?;

    let mut request = RequestDescriptor::service(url, layer, format)
        .with_param("SERVICE", provider)
        .with_param("BBOX", bbox.ogc_string())
        .with_param("CRS", bbox.crs.ogc_string());

    if let Some(time) = params.time {
        request = request.with_param("TIME", time.to_string());
    }
    for (name, value) in &params.extra {
        request = request.with_param(name.clone(), value.clone());
    }
    Ok(request)
}

/// WMS `GetMap` requests
#[derive(Debug, Clone)]
pub struct WmsRequestBuilder {
    endpoint: ServiceEndpoint,
}

impl WmsRequestBuilder {
    pub fn new(endpoint: ServiceEndpoint) -> Self {
        Self { endpoint }
    }
}

impl RequestBuilder for WmsRequestBuilder {
    fn build(&self, params: &RequestParams) -> Result<RequestDescriptor, DownloadError> {
        let format = params.format.unwrap_or(MimeType::Png);
        if !format.is_image() {
            return Err(DownloadError::InvalidRequest(format!(
                "WMS cannot produce {format} output"
            )));
        }
        let (width, height) = params.size.ok_or_else(|| missing("size", "WMS"))?;
        if width == 0 || height == 0 {
            return Err(DownloadError::InvalidRequest(
                "WMS image size must be non-zero".to_string(),
            ));
        }
        let layer = params.layer.clone().unwrap_or_default();

        Ok(ogc_descriptor(&self.endpoint, "wms", params, format)?
            .with_param("REQUEST", "GetMap")
            .with_param("VERSION", WMS_VERSION)
            .with_param("LAYERS", layer)
            .with_param("FORMAT", format.mime_str())
            .with_param("WIDTH", width.to_string())
            .with_param("HEIGHT", height.to_string()))
    }
}

/// WCS `GetCoverage` requests
#[derive(Debug, Clone)]
pub struct WcsRequestBuilder {
    endpoint: ServiceEndpoint,
}

impl WcsRequestBuilder {
    pub fn new(endpoint: ServiceEndpoint) -> Self {
        Self { endpoint }
    }
}

impl RequestBuilder for WcsRequestBuilder {
    fn build(&self, params: &RequestParams) -> Result<RequestDescriptor, DownloadError> {
        let format = params.format.unwrap_or(MimeType::Tiff);
        if !format.is_image() {
            return Err(DownloadError::InvalidRequest(format!(
                "WCS cannot produce {format} output"
            )));
        }
        let resolution = params
            .resolution
            .as_deref()
            .ok_or_else(|| missing("resolution", "WCS"))?;
        let layer = params.layer.clone().unwrap_or_default();

        Ok(ogc_descriptor(&self.endpoint, "wcs", params, format)?
            .with_param("REQUEST", "GetCoverage")
            .with_param("VERSION", WCS_VERSION)
            .with_param("COVERAGE", layer)
            .with_param("FORMAT", format.mime_str())
            .with_param("RESX", resolution)
            .with_param("RESY", resolution))
    }
}

/// Feature-info statistics requests; always JSON
#[derive(Debug, Clone)]
pub struct FisRequestBuilder {
    endpoint: ServiceEndpoint,
}

impl FisRequestBuilder {
    pub fn new(endpoint: ServiceEndpoint) -> Self {
        Self { endpoint }
    }
}

impl RequestBuilder for FisRequestBuilder {
    fn build(&self, params: &RequestParams) -> Result<RequestDescriptor, DownloadError> {
        if let Some(format) = params.format.filter(|f| *f != MimeType::Json) {
            return Err(DownloadError::InvalidRequest(format!(
                "FIS only returns JSON, not {format}"
            )));
        }
        let time = params.time.ok_or_else(|| missing("time", "FIS"))?;
        let resolution = params
            .resolution
            .as_deref()
            .ok_or_else(|| missing("resolution", "FIS"))?;
        let layer = params.layer.clone().unwrap_or_default();

        Ok(
            ogc_descriptor(&self.endpoint, "fis", params, MimeType::Json)?
                .with_param("LAYER", layer)
                .with_param("TIME", time.to_string())
                .with_param("RESOLUTION", resolution),
        )
    }
}

/// Sentinel-2 tile and product files from the public object store
#[derive(Debug, Clone)]
pub struct AwsRequestBuilder {
    pub bucket: String,
    pub region: String,
}

impl Default for AwsRequestBuilder {
    fn default() -> Self {
        Self {
            bucket: DEFAULT_L1C_BUCKET.to_string(),
            region: DEFAULT_AWS_REGION.to_string(),
        }
    }
}

impl AwsRequestBuilder {
    pub fn new(bucket: impl Into<String>, region: impl Into<String>) -> Self {
        Self {
            bucket: bucket.into(),
            region: region.into(),
        }
    }

    /// `tiles/{zone}/{band}/{square}/{year}/{month}/{day}/{index}`
    fn tile_prefix(tile: &str, params: &RequestParams) -> Result<String, DownloadError> {
        let (zone, band, square) = split_tile_name(tile)?;
        let time = params.time.ok_or_else(|| missing("time", "AWS"))?;
        let date = time.start;
        Ok(format!(
            "tiles/{zone}/{band}/{square}/{}/{}/{}/{}",
            date.year(),
            date.month(),
            date.day(),
            params.aws_index.unwrap_or(0)
        ))
    }

    /// `products/{year}/{month}/{day}/{product}`
    fn product_prefix(product: &str, params: &RequestParams) -> Result<String, DownloadError> {
        let date = match params.time {
            Some(time) => time.start,
            None => product_sensing_date(product)?,
        };
        Ok(format!(
            "products/{}/{}/{}/{}",
            date.year(),
            date.month(),
            date.day(),
            product.trim().trim_end_matches(".SAFE")
        ))
    }
}

impl RequestBuilder for AwsRequestBuilder {
    fn build(&self, params: &RequestParams) -> Result<RequestDescriptor, DownloadError> {
        let file = params
            .file
            .as_deref()
            .map(|f| f.trim().trim_start_matches('/'))
            .filter(|f| !f.is_empty())
            .ok_or_else(|| missing("file", "AWS"))?;

        let prefix = match (params.tile.as_deref(), params.product.as_deref()) {
            (Some(tile), None) => Self::tile_prefix(tile, params)?,
            (None, Some(product)) => Self::product_prefix(product, params)?,
            (Some(_), Some(_)) => {
                return Err(DownloadError::InvalidRequest(
                    "AWS request takes either a tile or a product, not both".to_string(),
                ));
            }
            (None, None) => return Err(missing("tile` or `product", "AWS")),
        };

        let format = params
            .format
            .or_else(|| MimeType::from_filename(file))
            .unwrap_or(MimeType::Raw);

        Ok(
            RequestDescriptor::object(&self.bucket, format!("{prefix}/{file}"), format)
                .with_region(&self.region),
        )
    }
}

/// Split `T33UUP` / `33UUP` into UTM zone, latitude band and grid square
fn split_tile_name(tile: &str) -> Result<(u32, char, String), DownloadError> {
    let invalid = || DownloadError::InvalidRequest(format!("invalid Sentinel-2 tile name: {tile}"));
    let name = tile.trim().trim_start_matches(['T', 't']).to_ascii_uppercase();

    let digits = name.chars().take_while(|c| c.is_ascii_digit()).count();
    if digits == 0 || digits > 2 || name.len() != digits + 3 {
        return Err(invalid());
    }
    let zone: u32 = name[..digits].parse().map_err(|_| invalid())?;
    if !(1..=60).contains(&zone) {
        return Err(invalid());
    }
    let rest = &name[digits..];
    if !rest.chars().all(|c| c.is_ascii_alphabetic()) {
        return Err(invalid());
    }
    let band = rest.chars().next().ok_or_else(invalid)?;
    Ok((zone, band, rest[1..].to_string()))
}

/// Sensing date embedded in a product id, e.g. `S2A_MSIL1C_20200101T101421_...`
fn product_sensing_date(product: &str) -> Result<chrono::NaiveDate, DownloadError> {
    product
        .split('_')
        .filter_map(|part| part.get(..8))
        .find_map(|date| chrono::NaiveDate::parse_from_str(date, "%Y%m%d").ok())
        .ok_or_else(|| {
            DownloadError::InvalidRequest(format!(
                "cannot infer the sensing date of product {product}; pass a time"
            ))
        })
}

/// Provider dialect, chosen once when the command or client is set up
#[derive(Debug, Clone)]
pub enum Provider {
    Wms(WmsRequestBuilder),
    Wcs(WcsRequestBuilder),
    Fis(FisRequestBuilder),
    Aws(AwsRequestBuilder),
}

impl Provider {
    pub fn name(&self) -> &'static str {
        match self {
            Provider::Wms(_) => "wms",
            Provider::Wcs(_) => "wcs",
            Provider::Fis(_) => "fis",
            Provider::Aws(_) => "aws",
        }
    }
}

impl RequestBuilder for Provider {
    fn build(&self, params: &RequestParams) -> Result<RequestDescriptor, DownloadError> {
        match self {
            Provider::Wms(builder) => builder.build(params),
            Provider::Wcs(builder) => builder.build(params),
            Provider::Fis(builder) => builder.build(params),
            Provider::Aws(builder) => builder.build(params),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::request::{BBox, Resource, TimeRange};

    fn endpoint() -> ServiceEndpoint {
        ServiceEndpoint::new("my-instance").with_base_url("https://example.com/")
    }

    fn params() -> RequestParams {
        RequestParams::new()
            .layer("TRUE_COLOR")
            .bbox("10,45,11,46".parse::<BBox>().unwrap())
            .time("2020-01-01".parse::<TimeRange>().unwrap())
    }

    #[test]
    fn test_wms_get_map() {
        let provider = Provider::Wms(WmsRequestBuilder::new(endpoint()));
        let request = provider.build(&params().size(512, 512)).unwrap();

        assert_eq!(
            request.resource,
            Resource::Service {
                endpoint: "https://example.com/ogc/wms/my-instance".to_string(),
                layer: "TRUE_COLOR".to_string(),
            }
        );
        assert_eq!(request.format, MimeType::Png);
        assert_eq!(request.params["REQUEST"], "GetMap");
        assert_eq!(request.params["LAYERS"], "TRUE_COLOR");
        assert_eq!(request.params["BBOX"], "10,45,11,46");
        assert_eq!(request.params["TIME"], "2020-01-01/2020-01-01");
        assert_eq!(request.params["WIDTH"], "512");
    }

    #[test]
    fn test_wms_requires_size_and_image_format() {
        let builder = WmsRequestBuilder::new(endpoint());
        assert!(builder.build(&params()).is_err());
        assert!(
            builder
                .build(&params().size(10, 10).format(MimeType::Json))
                .is_err()
        );
    }

    #[test]
    fn test_wcs_and_fis() {
        let wcs = WcsRequestBuilder::new(endpoint())
            .build(&params().resolution("10m"))
            .unwrap();
        assert_eq!(wcs.format, MimeType::Tiff);
        assert_eq!(wcs.params["COVERAGE"], "TRUE_COLOR");
        assert_eq!(wcs.params["RESX"], "10m");

        let fis = FisRequestBuilder::new(endpoint())
            .build(&params().resolution("60m"))
            .unwrap();
        assert_eq!(fis.format, MimeType::Json);
        assert_eq!(fis.params["LAYER"], "TRUE_COLOR");
        assert!(
            FisRequestBuilder::new(endpoint())
                .build(&params().resolution("60m").format(MimeType::Png))
                .is_err()
        );
    }

    #[test]
    fn test_missing_instance_id_is_invalid() {
        let builder = WmsRequestBuilder::new(ServiceEndpoint::new(" "));
        assert!(matches!(
            builder.build(&params().size(1, 1)),
            Err(DownloadError::InvalidRequest(_))
        ));
    }

    #[test]
    fn test_aws_tile_file() {
        let request = AwsRequestBuilder::default()
            .build(
                &RequestParams::new()
                    .tile("T33UUP")
                    .time("2020-01-05".parse().unwrap())
                    .aws_index(1)
                    .file("B01.jp2"),
            )
            .unwrap();

        assert_eq!(
            request.resource,
            Resource::Object {
                bucket: DEFAULT_L1C_BUCKET.to_string(),
                key: "tiles/33/U/UP/2020/1/5/1/B01.jp2".to_string(),
                region: Some(DEFAULT_AWS_REGION.to_string()),
            }
        );
        assert_eq!(request.format, MimeType::Jp2);
    }

    #[test]
    fn test_aws_product_date_from_id() {
        let request = AwsRequestBuilder::default()
            .build(
                &RequestParams::new()
                    .product("S2A_MSIL1C_20200101T101421_N0208_R022_T32TQM_20200101T122024.SAFE")
                    .file("manifest.safe"),
            )
            .unwrap();

        match request.resource {
            Resource::Object { key, .. } => assert_eq!(
                key,
                "products/2020/1/1/S2A_MSIL1C_20200101T101421_N0208_R022_T32TQM_20200101T122024/manifest.safe"
            ),
            other => panic!("unexpected resource {other:?}"),
        }
        assert_eq!(request.format, MimeType::Safe);
    }

    #[test]
    fn test_split_tile_name() {
        assert_eq!(split_tile_name("T33UUP").unwrap(), (33, 'U', "UP".to_string()));
        assert_eq!(split_tile_name("4QFJ").unwrap(), (4, 'Q', "FJ".to_string()));
        assert!(split_tile_name("T99UUP").is_err());
        assert!(split_tile_name("33UU").is_err());
        assert!(split_tile_name("T3_UUP").is_err());
    }
}
