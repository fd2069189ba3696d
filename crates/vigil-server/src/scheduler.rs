use crate::engine::Engine;
use anyhow::Result;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_cron_scheduler::{Job, JobScheduler};
use tracing::{debug, error, info, warn};
use vigil_config::SchedulerConfig;

/// 周期任务调度
///
/// 每个服务一个按自身间隔运行的检查任务；聚合巡检和数据清理由 cron 驱动。
pub struct Scheduler {
    cron: JobScheduler,
    health_tasks: Vec<JoinHandle<()>>,
}

impl Scheduler {
    pub async fn start(
        engine: Arc<Engine>,
        config: &SchedulerConfig,
        shutdown: watch::Receiver<bool>,
    ) -> Result<Self> {
        let health_tasks = spawn_health_checks(engine.clone(), shutdown).await;

        let cron = JobScheduler::new().await?;

        let sweep_engine = engine.clone();
        let sweep = Job::new_async(config.aggregation_cron.as_str(), move |_uuid, _l| {
            let engine = sweep_engine.clone();
            Box::pin(async move {
                let report = engine.sweep_aggregations().await;
                if report.failed > 0 {
                    warn!(failed = report.failed, "Aggregation sweep finished with failures");
                }
            })
        })?;
        cron.add(sweep).await?;

        let retention_engine = engine.clone();
        let retention = Job::new_async(config.retention_cron.as_str(), move |_uuid, _l| {
            let engine = retention_engine.clone();
            Box::pin(async move {
                match engine.apply_retention().await {
                    Ok(removed) => debug!(removed, "Retention task completed"),
                    Err(e) => error!(error = %e, "Retention task failed"),
                }
            })
        })?;
        cron.add(retention).await?;

        cron.start().await?;

        info!(
            services = health_tasks.len(),
            aggregation_cron = %config.aggregation_cron,
            retention_cron = %config.retention_cron,
            "Scheduler started"
        );

        Ok(Self { cron, health_tasks })
    }

    /// 停止 cron 任务并等待健康检查任务退出
    ///
    /// 调用前需先发送停止信号。
    pub async fn shutdown(mut self) -> Result<()> {
        self.cron.shutdown().await?;
        for task in self.health_tasks {
            if let Err(e) = task.await {
                warn!(error = %e, "Health check task ended abnormally");
            }
        }
        info!("Scheduler stopped");
        Ok(())
    }
}

/// 为每个已注册服务启动检查任务，收到停止信号后退出
pub async fn spawn_health_checks(
    engine: Arc<Engine>,
    shutdown: watch::Receiver<bool>,
) -> Vec<JoinHandle<()>> {
    engine
        .evaluator()
        .services()
        .await
        .into_iter()
        .map(|service| {
            let engine = engine.clone();
            let mut shutdown = shutdown.clone();

            tokio::spawn(async move {
                let mut ticker = tokio::time::interval(service.interval);
                ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

                loop {
                    tokio::select! {
                        _ = ticker.tick() => {
                            if let Err(e) = engine.evaluator().evaluate(&service.name).await {
                                warn!(service = %service.name, error = %e, "Health check failed");
                            }
                        }
                        _ = shutdown.changed() => break,
                    }
                }
                debug!(service = %service.name, "Health check task stopped");
            })
        })
        .collect()
}
