//! Command-line options for the operator CLI.

use clap::{Parser, Subcommand};
use uuid::Uuid;

use notekeep_core::defaults;

#[derive(Parser, Debug)]
#[command(name = "notekeep-admin", about = "Attachment storage maintenance for notekeep")]
pub struct CliOpts {
    #[arg(
        long,
        help = "PostgreSQL connection URL",
        env = "DATABASE_URL",
        default_value = defaults::DATABASE_URL
    )]
    pub database_url: String,

    #[arg(long, help = "Enable debug logging")]
    pub debug: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, PartialEq, Eq)]
pub enum Command {
    /// Apply pending database migrations.
    Migrate,
    /// Show a user's quota ledger.
    Quota { user_id: Uuid },
    /// Recompute quota ledgers from stored attachments.
    Reconcile {
        #[arg(required_unless_present = "all", conflicts_with = "all")]
        user_id: Option<Uuid>,
        #[arg(long, help = "Reconcile every user")]
        all: bool,
    },
    /// Permanently remove one soft-deleted attachment.
    Purge { attachment_id: Uuid },
    /// Purge attachments soft-deleted longer than the retention window.
    PurgeExpired {
        #[arg(
            long,
            help = "Retention in days (default: PURGE_RETENTION_DAYS)",
            value_parser = clap::value_parser!(i64).range(0..=defaults::MAX_PURGE_RETENTION_DAYS)
        )]
        days: Option<i64>,
    },
    /// List a user's soft-deleted attachments.
    ListDeleted { user_id: Uuid },
}

#[cfg(test)]
mod tests {
    use super::*;

    const USER: &str = "01948f7e-8b2a-7c3d-9e4f-5a6b7c8d9e0f";

    fn parse(args: &[&str]) -> Result<CliOpts, clap::Error> {
        CliOpts::try_parse_from(std::iter::once("notekeep-admin").chain(args.iter().copied()))
    }

    #[test]
    fn test_parse_quota() {
        let opts = parse(&["quota", USER]).unwrap();
        assert_eq!(
            opts.command,
            Command::Quota {
                user_id: Uuid::parse_str(USER).unwrap()
            }
        );
    }

    #[test]
    fn test_reconcile_needs_user_or_all() {
        assert!(parse(&["reconcile"]).is_err());
        assert!(parse(&["reconcile", USER, "--all"]).is_err());

        let opts = parse(&["reconcile", "--all"]).unwrap();
        assert_eq!(
            opts.command,
            Command::Reconcile {
                user_id: None,
                all: true
            }
        );
    }

    #[test]
    fn test_purge_expired_days_optional() {
        let opts = parse(&["purge-expired"]).unwrap();
        assert_eq!(opts.command, Command::PurgeExpired { days: None });

        let opts = parse(&["purge-expired", "--days", "7"]).unwrap();
        assert_eq!(opts.command, Command::PurgeExpired { days: Some(7) });
    }

    #[test]
    fn test_purge_expired_days_bounded() {
        assert!(parse(&["purge-expired", "--days=-1"]).is_err());
        assert!(parse(&["purge-expired", "--days", "36501"]).is_err());
        assert!(parse(&["purge-expired", "--days", "10000000000"]).is_err());

        let opts = parse(&["purge-expired", "--days", "0"]).unwrap();
        assert_eq!(opts.command, Command::PurgeExpired { days: Some(0) });
    }

    #[test]
    fn test_rejects_malformed_ids() {
        assert!(parse(&["list-deleted", "not-a-uuid"]).is_err());
    }

    #[test]
    fn test_explicit_database_url() {
        let opts = parse(&["--database-url", "postgres://example/db", "migrate"]).unwrap();
        assert_eq!(opts.database_url, "postgres://example/db");
        assert_eq!(opts.command, Command::Migrate);
    }
}
