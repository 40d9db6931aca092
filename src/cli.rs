// Command-line surface. Running without a subcommand publishes; the
// `s3-config` subcommand manages the saved storage settings.

use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

use crate::config::StorageOverrides;
use crate::pipeline::PublishOptions;

#[derive(Debug, Parser)]
#[command(
    name = "mini-test-groups",
    version,
    about = "Upload a static build to S3 and point a VK mini-app testing group at it",
    args_conflicts_with_subcommands = true
)]
pub struct Cli {
    /// Output extra debugging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Option<Command>,

    #[command(flatten)]
    pub publish: PublishArgs,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Save, or print, the S3 settings used by publish runs
    S3Config(S3ConfigArgs),
}

#[derive(Debug, Args)]
pub struct S3ConfigArgs {
    /// Config as a JSON object or base64-encoded JSON
    pub config: Option<String>,

    /// Print the current config as JSON and base64
    #[arg(short, long)]
    pub print: bool,
}

#[derive(Debug, Args)]
pub struct PublishArgs {
    /// Check that everything is committed, then exit
    #[arg(short, long)]
    pub check_only: bool,

    /// Skip the uncommitted/unpushed changes checks
    #[arg(short, long)]
    pub force: bool,

    /// Testing group name
    #[arg(short, long, value_name = "NAME")]
    pub domain: Option<String>,

    /// Folder in the bucket to upload the build to
    #[arg(long, value_name = "PREFIX")]
    pub s3_upload_prefix: Option<String>,

    /// VK app whose testing group is updated
    #[arg(long, value_name = "APP_ID")]
    pub vk_app_id: Option<String>,

    /// Directory with static files
    #[arg(short, long = "build", value_name = "DIR", default_value = "build")]
    pub build_dir: PathBuf,

    #[arg(long, value_name = "KEY")]
    pub s3_access_key: Option<String>,

    #[arg(long, value_name = "SECRET")]
    pub s3_secret_key: Option<String>,

    /// S3 endpoint, https only
    #[arg(long, value_name = "URL")]
    pub s3_endpoint: Option<String>,

    /// S3 region [default: ru-1]
    #[arg(long, value_name = "REGION")]
    pub s3_region: Option<String>,

    #[arg(long, alias = "s3-bucked", value_name = "BUCKET")]
    pub s3_bucket: Option<String>,

    /// Public (CDN) endpoint files are served from, https only
    #[arg(long, value_name = "URL")]
    pub s3_public_endpoint: Option<String>,

    /// Path inserted between the public endpoint and the object key
    #[arg(long, value_name = "PREFIX")]
    pub s3_public_prefix: Option<String>,
}

impl PublishArgs {
    pub fn into_options(self) -> PublishOptions {
        PublishOptions {
            build_dir: self.build_dir,
            upload_prefix: self.s3_upload_prefix,
            group_name: self.domain,
            app_id: self.vk_app_id,
            force: self.force,
            check_only: self.check_only,
            storage: StorageOverrides {
                access_key: self.s3_access_key,
                secret_key: self.s3_secret_key,
                region: self.s3_region,
                endpoint: self.s3_endpoint,
                bucket_name: self.s3_bucket,
                public_endpoint: self.s3_public_endpoint,
                public_prefix: self.s3_public_prefix,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn publish_flags_map_to_options() {
        let cli = Cli::try_parse_from([
            "mini-test-groups",
            "-f",
            "-d",
            "alice qa",
            "--vk-app-id",
            "51",
            "--s3-bucked",
            "builds",
            "-b",
            "dist",
        ])
        .unwrap();
        assert!(cli.command.is_none());

        let opts = cli.publish.into_options();
        assert!(opts.force);
        assert!(!opts.check_only);
        assert_eq!(opts.group_name.as_deref(), Some("alice qa"));
        assert_eq!(opts.app_id.as_deref(), Some("51"));
        assert_eq!(opts.storage.bucket_name.as_deref(), Some("builds"));
        assert_eq!(opts.build_dir, PathBuf::from("dist"));
    }

    #[test]
    fn build_dir_defaults_to_build() {
        let cli = Cli::try_parse_from(["mini-test-groups"]).unwrap();
        assert_eq!(cli.publish.build_dir, PathBuf::from("build"));
        assert!(!cli.verbose);
    }

    #[test]
    fn s3_config_subcommand() {
        let cli = Cli::try_parse_from(["mini-test-groups", "s3-config", "-p", "-v"]).unwrap();
        assert!(cli.verbose);
        match cli.command {
            Some(Command::S3Config(args)) => {
                assert!(args.print);
                assert!(args.config.is_none());
            }
            None => panic!("expected s3-config"),
        }
    }
}
