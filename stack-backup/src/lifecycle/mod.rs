//! Service group lifecycle: observe, stop and start the long-running services
//! whose data is being archived.

pub mod compose;

use crate::utils::errors::Result;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// The narrow surface needed from whatever runs the service group.
pub trait ContainerController: Send + Sync {
    /// Name of the controlled group, for log and report output
    fn group(&self) -> &str;

    fn is_running(&self) -> impl Future<Output = Result<bool>> + Send;

    fn stop(&self) -> impl Future<Output = Result<()>> + Send;

    fn start(&self) -> impl Future<Output = Result<()>> + Send;
}

impl<C: ContainerController> ContainerController for Arc<C> {
    fn group(&self) -> &str {
        (**self).group()
    }

    fn is_running(&self) -> impl Future<Output = Result<bool>> + Send {
        (**self).is_running()
    }

    fn stop(&self) -> impl Future<Output = Result<()>> + Send {
        (**self).stop()
    }

    fn start(&self) -> impl Future<Output = Result<()>> + Send {
        (**self).start()
    }
}

/// Wraps a controller with the fixed settle wait applied after stopping.
pub struct LifecycleCoordinator<C> {
    controller: C,
    settle: Duration,
}

impl<C: ContainerController> LifecycleCoordinator<C> {
    pub fn new(controller: C, settle: Duration) -> Self {
        Self { controller, settle }
    }

    pub fn group(&self) -> &str {
        self.controller.group()
    }

    pub async fn is_running(&self) -> Result<bool> {
        self.controller.is_running().await
    }

    /// Stop the group, then wait the settle period so in-flight writes land.
    pub async fn stop(&self) -> Result<()> {
        info!(group = %self.group(), "Stopping service group");
        self.controller.stop().await?;

        if !self.settle.is_zero() {
            info!(
                group = %self.group(),
                "Waiting {}s for services to settle",
                self.settle.as_secs_f32()
            );
            tokio::time::sleep(self.settle).await;
        }
        Ok(())
    }

    pub async fn start(&self) -> Result<()> {
        info!(group = %self.group(), "Starting service group");
        self.controller.start().await
    }

    /// Stop the group if it is running. Returns whether it was stopped, which
    /// is what [`resume`](Self::resume) needs to know.
    pub async fn pause(&self) -> Result<bool> {
        if self.is_running().await? {
            self.stop().await?;
            Ok(true)
        } else {
            info!(group = %self.group(), "Service group not running, nothing to stop");
            Ok(false)
        }
    }

    /// Start the group again, but only if `pause` stopped it.
    pub async fn resume(&self, was_running: bool) -> Result<()> {
        if !was_running {
            return Ok(());
        }
        self.start().await.inspect_err(|e| {
            warn!(group = %self.group(), "Failed to restart service group: {}", e);
        })
    }
}
