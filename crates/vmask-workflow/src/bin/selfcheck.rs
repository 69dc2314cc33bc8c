use std::path::Path;

use vmask_client::{HttpIntentService, HttpMaskService, HttpTaskService};
use vmask_media::{check_ffmpeg, check_ffprobe, FrameSamplerConfig};
use vmask_workflow::{init_tracing, WorkflowConfig};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    rustls::crypto::ring::default_provider()
        .install_default()
        .map_err(|_| anyhow::anyhow!("failed to install rustls crypto provider"))?;
    dotenvy::dotenv().ok();
    init_tracing();

    let config = WorkflowConfig::from_env();
    let frames = FrameSamplerConfig::from_env();
    println!(
        "vmask-selfcheck: starting with work_dir={} frame_dir={}",
        config.work_dir,
        frames.output_dir.display()
    );

    ensure_workdir(&config.work_dir).await?;
    ensure_workdir(&frames.output_dir).await?;

    let ffmpeg = check_ffmpeg().map_err(|e| anyhow::anyhow!("ffmpeg not available: {}", e))?;
    let ffprobe = check_ffprobe().map_err(|e| anyhow::anyhow!("ffprobe not available: {}", e))?;
    println!("vmask-selfcheck: ffmpeg={} ffprobe={}", ffmpeg.display(), ffprobe.display());

    let mask = HttpMaskService::from_env()?;
    let tasks = HttpTaskService::from_env()?;
    let intent = HttpIntentService::from_env()?;
    let results = [
        ("mask service", mask.health_check().await?),
        ("task service", tasks.health_check().await?),
        ("intent service", intent.health_check().await?),
    ];

    let mut healthy = true;
    for (name, ok) in results {
        println!("vmask-selfcheck: {} {}", name, if ok { "ok" } else { "UNHEALTHY" });
        healthy &= ok;
    }
    if !healthy {
        return Err(anyhow::anyhow!("one or more services are unhealthy"));
    }

    println!("vmask-selfcheck: ok");
    Ok(())
}

async fn ensure_workdir<P: AsRef<Path>>(path: P) -> anyhow::Result<()> {
    tokio::fs::create_dir_all(path.as_ref()).await?;
    Ok(())
}
