//! Submariner connectivity between the managed clusters
//!
//! The broker is deployed on the hub, or the first cluster when no hub is
//! configured. Every managed cluster then joins with the broker info file
//! `subctl deploy-broker` leaves in the working directory.

use crate::cluster::ClusterContext;
use crate::domain::ports::{CommandRunner, LocalCommand};
use crate::error::Result;
use std::path::Path;
use tracing::info;

pub const SUBCTL: &str = "subctl";
pub const BROKER_INFO: &str = "broker-info.subm";

pub struct SubmarinerDeployer<'a> {
    runner: &'a dyn CommandRunner,
    workdir: &'a Path,
}

impl<'a> SubmarinerDeployer<'a> {
    pub fn new(runner: &'a dyn CommandRunner, workdir: &'a Path) -> Self {
        Self { runner, workdir }
    }

    pub async fn deploy(&self, broker: &ClusterContext, members: &[ClusterContext]) -> Result<()> {
        info!("Deploying the Submariner broker on {}", broker.name);
        self.subctl(
            LocalCommand::new(SUBCTL)
                .arg("deploy-broker")
                .arg("--kubeconfig")
                .arg(broker.kubeconfig.display().to_string()),
        )
        .await?;

        for member in members {
            info!("Joining {} to the Submariner broker", member.name);
            self.subctl(
                LocalCommand::new(SUBCTL)
                    .arg("join")
                    .arg(BROKER_INFO)
                    .arg("--kubeconfig")
                    .arg(member.kubeconfig.display().to_string())
                    .arg("--clusterid")
                    .arg(member.name.as_str())
                    .arg("--natt=false"),
            )
            .await?;
        }
        Ok(())
    }

    async fn subctl(&self, command: LocalCommand) -> Result<()> {
        let command = command.cwd(self.workdir);
        self.runner.run(&command).await?.into_result(&command.display())?;
        Ok(())
    }
}
