use std::path::{Path, PathBuf};

use geofetch_engine::cache::CacheProvider;
use geofetch_engine::request::{
    AwsRequestBuilder, FisRequestBuilder, ServiceEndpoint, WcsRequestBuilder, WmsRequestBuilder,
};
use geofetch_engine::{
    Artifact, BBox, CacheManager, Checksum, Crs, DownloadManager, Fingerprint, MimeType, Provider,
    RequestBuilder, RequestDescriptor, RequestParams, fingerprint,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::cli::{AwsArgs, CacheAction, OutputArgs, ServiceArgs};
use crate::config::AppConfig;
use crate::error::{AppError, Result};
use crate::utils::format_bytes;

/// OGC-style services reachable through an instance id
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Service {
    Wms,
    Wcs,
    Fis,
}

pub struct CommandExecutor {
    config: AppConfig,
}

impl CommandExecutor {
    pub fn new(config: AppConfig) -> Self {
        Self { config }
    }

    /// Build the descriptor of a service command
    pub fn service_request(&self, service: Service, args: &ServiceArgs) -> Result<RequestDescriptor> {
        let instance_id = args
            .instance_id
            .clone()
            .or_else(|| self.config.instance_id.clone())
            .ok_or_else(|| {
                AppError::InvalidInput(
                    "an instance id is required (--instance-id or `instance_id` in the config file)"
                        .to_string(),
                )
            })?;
        let endpoint = ServiceEndpoint::new(instance_id).with_base_url(
            args.base_url
                .clone()
                .unwrap_or_else(|| self.config.service_url.clone()),
        );

        let provider = match service {
            Service::Wms => Provider::Wms(WmsRequestBuilder::new(endpoint)),
            Service::Wcs => Provider::Wcs(WcsRequestBuilder::new(endpoint)),
            Service::Fis => Provider::Fis(FisRequestBuilder::new(endpoint)),
        };
        Ok(provider.build(&service_params(args)?)?)
    }

    /// Build the descriptor of an object store command
    pub fn aws_request(&self, args: &AwsArgs) -> Result<RequestDescriptor> {
        let builder = AwsRequestBuilder::new(
            args.bucket
                .clone()
                .unwrap_or_else(|| self.config.aws_bucket.clone()),
            args.region
                .clone()
                .unwrap_or_else(|| self.config.aws_region.clone()),
        );

        let mut params = RequestParams::new().file(&args.file);
        if let Some(tile) = &args.tile {
            params = params.tile(tile);
        }
        if let Some(product) = &args.product {
            params = params.product(product);
        }
        if let Some(time) = &args.time {
            params = params.time(time.parse()?);
        }
        if let Some(index) = args.index {
            params = params.aws_index(index);
        }
        if let Some(format) = args.format {
            params = params.format(format);
        }

        let mut request = Provider::Aws(builder).build(&params)?;
        if let Some(checksum) = &args.checksum {
            request = request.with_checksum(checksum.parse::<Checksum>()?);
        }
        Ok(request)
    }

    /// Where an artifact of `key` ends up on disk
    pub fn target_path(&self, key: &Fingerprint, format: MimeType, output: &OutputArgs) -> PathBuf {
        match &output.output {
            Some(path) => path.clone(),
            None => output
                .output_dir
                .as_ref()
                .unwrap_or(&self.config.output_dir)
                .join(format!("{}.{}", key.short(), format.extension())),
        }
    }

    /// Download `request` and print the path of the saved artifact
    pub async fn download(&self, request: RequestDescriptor, output: &OutputArgs) -> Result<()> {
        let key = fingerprint(&request)?;
        let target = self.target_path(&key, request.format, output);

        if output.dry_run {
            println!("fingerprint: {key}");
            println!("resource:    {}", request.resource);
            for (name, value) in &request.params {
                println!("  {name}={value}");
            }
            println!("target:      {}", target.display());
            return Ok(());
        }

        let manager = DownloadManager::new(
            &self.config.downloader_config()?,
            self.config.manager_config()?,
        )
        .await?;

        let cancel = CancellationToken::new();
        {
            let cancel = cancel.clone();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    warn!("Interrupted, cancelling download");
                    cancel.cancel();
                }
            });
        }

        info!(fingerprint = %key.short(), resource = %request.resource, "Downloading");
        let artifact = manager.download_with_cancel(request, cancel).await?;
        write_artifact(&artifact, &target).await?;

        info!(
            origin = ?artifact.origin,
            size = %format_bytes(artifact.metadata.size),
            "Saved {}",
            target.display()
        );
        debug!(stats = ?manager.stats(), "Download finished");
        println!("{}", target.display());
        Ok(())
    }

    pub async fn cache(&self, action: CacheAction) -> Result<()> {
        let mut config = self.config.cache_config()?;
        // Maintenance works on the store even when downloads bypass it
        config.enabled = true;
        let dir = config.resolved_disk_path();
        let cache = CacheManager::new(config).await?;

        match action {
            CacheAction::Clear => {
                cache.clear().await?;
                println!("Cleared cache at {}", dir.display());
            }
            CacheAction::Sweep => {
                let removed = cache.sweep().await?;
                println!("Removed {removed} cache entries from {}", dir.display());
            }
        }
        Ok(())
    }
}

fn service_params(args: &ServiceArgs) -> Result<RequestParams> {
    let mut bbox: BBox = args.bbox.parse()?;
    bbox.crs = args.crs.parse::<Crs>()?;

    let mut params = RequestParams::new().layer(&args.layer).bbox(bbox);
    if let Some(time) = &args.time {
        params = params.time(time.parse()?);
    }
    if let Some(format) = args.format {
        params = params.format(format);
    }
    if let Some((width, height)) = args.size {
        params = params.size(width, height);
    }
    if let Some(resolution) = &args.resolution {
        params = params.resolution(resolution);
    }
    for (name, value) in &args.params {
        params = params.extra(name, value);
    }
    Ok(params)
}

async fn write_artifact(artifact: &Artifact, target: &Path) -> Result<()> {
    if let Some(parent) = target.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent).await?;
    }
    tokio::fs::write(target, &artifact.payload).await?;
    Ok(())
}
