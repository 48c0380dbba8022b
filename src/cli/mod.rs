//! Command-line interface for sfctl
//!
//! Global flags carry the cluster credentials and output format; every
//! subcommand is an [`Action`](crate::action::Action) run through the
//! [`ActionRunner`].

pub mod commands;
pub mod completions;

use clap::{Parser, Subcommand};
use clap_complete::Shell;
use std::path::PathBuf;

use crate::action::{Action, ActionContext, ActionRunner, OutputFormat};
use crate::config::Config;
use commands::{account, cluster, drives, gc, network, node, pairing, volgroup, volume};

/// sfctl - control a clustered block-storage appliance
#[derive(Parser, Debug, Clone)]
#[command(name = "sfctl")]
#[command(version)]
#[command(about = "Cluster control for clustered block storage", long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Management VIP of the cluster
    #[arg(short = 'm', long, global = true, env = "SFMVIP")]
    pub mvip: Option<String>,

    /// Cluster admin user
    #[arg(short = 'u', long = "user", global = true, env = "SFUSER")]
    pub username: Option<String>,

    /// Cluster admin password
    #[arg(short = 'p', long = "pass", global = true, env = "SFPASS", hide_env_values = true)]
    pub password: Option<String>,

    /// Print results as one comma separated line
    #[arg(long, global = true, conflicts_with_all = ["bash", "json"])]
    pub csv: bool,

    /// Print results as one space separated line
    #[arg(long, global = true, conflicts_with = "json")]
    pub bash: bool,

    /// Print results as JSON
    #[arg(long, global = true)]
    pub json: bool,

    /// Show debug messages on the console
    #[arg(long, global = true)]
    pub debug: bool,

    /// Publish the result to this ZeroMQ address when finished
    #[arg(long = "result_address", global = true)]
    pub result_address: Option<String>,

    /// Path to the configuration file
    #[arg(short = 'c', long, global = true, env = "SFCTL_CONFIG")]
    pub config: Option<PathBuf>,

    /// Disable colored output
    #[arg(long, global = true)]
    pub no_color: bool,
}

impl Cli {
    /// Parse the process arguments. Bad arguments exit 1, help and version 0.
    pub fn parse_args() -> Self {
        Cli::try_parse().unwrap_or_else(|e| {
            let code = if e.use_stderr() { 1 } else { 0 };
            let _ = e.print();
            std::process::exit(code);
        })
    }

    pub fn output_format(&self) -> OutputFormat {
        OutputFormat::from_flags(self.csv, self.bash, self.json)
    }

    /// Command-line credentials win over the configuration file.
    pub fn apply_to(&self, config: &mut Config) {
        if let Some(mvip) = &self.mvip {
            config.cluster.mvip = Some(mvip.clone());
        }
        if let Some(username) = &self.username {
            config.cluster.username = username.clone();
        }
        if let Some(password) = &self.password {
            config.cluster.password = password.clone();
        }
        if self.no_color {
            config.logging.color = false;
        }
    }
}

/// Available subcommands
#[derive(Subcommand, Debug, Clone)]
pub enum Commands {
    AccountCreate(account::AccountCreateArgs),
    AccountDelete(account::AccountDeleteArgs),
    AccountMoveVolumes(account::AccountMoveVolumesArgs),
    AccountListVolumes(account::AccountListVolumesArgs),

    VolgroupCreate(volgroup::VolgroupCreateArgs),
    VolgroupDelete(volgroup::VolgroupDeleteArgs),
    VolgroupAddInitiators(volgroup::VolgroupAddInitiatorsArgs),
    VolgroupRemoveInitiators(volgroup::VolgroupRemoveInitiatorsArgs),
    VolgroupAddVolumes(volgroup::VolgroupAddVolumesArgs),
    VolgroupModifyLunAssignments(volgroup::VolgroupModifyLunAssignmentsArgs),

    VolumeCreate(volume::VolumeCreateArgs),
    VolumeDelete(volume::VolumeDeleteArgs),
    VolumePurge(volume::VolumePurgeArgs),
    VolumeExtend(volume::VolumeExtendArgs),
    VolumeSetQos(volume::VolumeSetQosArgs),
    VolumeClone(volume::VolumeCloneArgs),

    WaitForClusterFullness(cluster::WaitForClusterFullnessArgs),
    CheckForEvent(cluster::CheckForEventArgs),
    WaitForSync(cluster::WaitForSyncArgs),

    ClusterStartGc(gc::ClusterStartGcArgs),
    WaitForGc(gc::WaitForGcArgs),
    ShowLastGc(gc::ShowLastGcArgs),

    CountAvailableDrives(drives::CountAvailableDrivesArgs),
    AddAvailableDrives(drives::AddAvailableDrivesArgs),
    WaitForHealthyDrives(drives::WaitForHealthyDrivesArgs),

    ListPendingNodes(node::ListPendingNodesArgs),
    NodeExec(node::NodeExecArgs),

    CreateVlan(network::CreateVlanArgs),
    DeleteVlan(network::DeleteVlanArgs),

    ClusterPairCreate(pairing::ClusterPairCreateArgs),
    ClusterPairDelete(pairing::ClusterPairDeleteArgs),

    /// Print a shell completion script
    Completions {
        #[arg(value_enum)]
        shell: Shell,
    },
}

/// Expands to one match over every action variant.
macro_rules! each_action {
    ($command:expr, $args:ident => $body:expr, $other:pat => $fallback:expr) => {
        match $command {
            Commands::AccountCreate($args) => $body,
            Commands::AccountDelete($args) => $body,
            Commands::AccountMoveVolumes($args) => $body,
            Commands::AccountListVolumes($args) => $body,
            Commands::VolgroupCreate($args) => $body,
            Commands::VolgroupDelete($args) => $body,
            Commands::VolgroupAddInitiators($args) => $body,
            Commands::VolgroupRemoveInitiators($args) => $body,
            Commands::VolgroupAddVolumes($args) => $body,
            Commands::VolgroupModifyLunAssignments($args) => $body,
            Commands::VolumeCreate($args) => $body,
            Commands::VolumeDelete($args) => $body,
            Commands::VolumePurge($args) => $body,
            Commands::VolumeExtend($args) => $body,
            Commands::VolumeSetQos($args) => $body,
            Commands::VolumeClone($args) => $body,
            Commands::WaitForClusterFullness($args) => $body,
            Commands::CheckForEvent($args) => $body,
            Commands::WaitForSync($args) => $body,
            Commands::ClusterStartGc($args) => $body,
            Commands::WaitForGc($args) => $body,
            Commands::ShowLastGc($args) => $body,
            Commands::CountAvailableDrives($args) => $body,
            Commands::AddAvailableDrives($args) => $body,
            Commands::WaitForHealthyDrives($args) => $body,
            Commands::ListPendingNodes($args) => $body,
            Commands::NodeExec($args) => $body,
            Commands::CreateVlan($args) => $body,
            Commands::DeleteVlan($args) => $body,
            Commands::ClusterPairCreate($args) => $body,
            Commands::ClusterPairDelete($args) => $body,
            $other => $fallback,
        }
    };
}

fn action_name<A: Action>(_action: &A) -> &'static str {
    A::NAME
}

impl Commands {
    /// Name of the subcommand, as typed on the command line.
    pub fn name(&self) -> &'static str {
        each_action!(self, args => action_name(args), Commands::Completions { .. } => "completions")
    }

    /// Run the subcommand and return the process exit code.
    pub async fn run(&self, runner: &ActionRunner, ctx: &ActionContext) -> i32 {
        each_action!(self, args => runner.run(args, ctx).await, Commands::Completions { shell } => {
            completions::generate_completions(*shell);
            0
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_subcommand_names_match_actions() {
        let names: Vec<String> = Cli::command()
            .get_subcommands()
            .map(|c| c.get_name().to_string())
            .filter(|n| n != "completions")
            .collect();
        assert_eq!(names.len(), 31);

        let cli = Cli::try_parse_from(["sfctl", "volgroup-modify-lun-assignments", "--volgroup-name", "g1"]).unwrap();
        assert_eq!(cli.command.name(), "volgroup-modify-lun-assignments");
        let cli = Cli::try_parse_from(["sfctl", "cluster-start-gc"]).unwrap();
        assert_eq!(cli.command.name(), "cluster-start-gc");
        assert!(names.iter().any(|n| n == "wait-for-cluster-fullness"));
    }

    #[test]
    fn test_global_flags() {
        let cli = Cli::try_parse_from([
            "sfctl",
            "account-list-volumes",
            "--account-name",
            "acct1",
            "--mvip",
            "10.1.1.1",
            "--user",
            "admin",
            "--pass",
            "secret",
            "--csv",
            "--result_address=tcp://127.0.0.1:5000",
        ])
        .unwrap();
        assert_eq!(cli.output_format(), OutputFormat::Csv);
        assert_eq!(cli.result_address.as_deref(), Some("tcp://127.0.0.1:5000"));

        let mut config = Config::default();
        cli.apply_to(&mut config);
        assert_eq!(config.cluster.mvip.as_deref(), Some("10.1.1.1"));
        assert_eq!(config.cluster.username, "admin");
        assert_eq!(config.cluster.password, "secret");
    }

    #[test]
    fn test_output_flags_conflict() {
        assert!(Cli::try_parse_from(["sfctl", "show-last-gc", "--csv", "--json"]).is_err());
    }

    #[test]
    fn test_comma_separated_ids() {
        let cli = Cli::try_parse_from(["sfctl", "volume-delete", "--volume-id", "1,2,3", "--purge"]).unwrap();
        match cli.command {
            Commands::VolumeDelete(args) => {
                assert_eq!(args.select.volume_ids, vec![1, 2, 3]);
                assert!(args.purge);
            }
            other => panic!("unexpected command {other:?}"),
        }
    }
}
