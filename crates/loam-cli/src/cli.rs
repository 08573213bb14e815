use clap::{Args, Parser, Subcommand};

#[derive(Parser)]
#[command(
    name = "loam",
    about = "Loam — inspection tooling for pack stores",
    version,
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    #[arg(short, long, global = true)]
    pub verbose: bool,
}

#[derive(Subcommand)]
pub enum Command {
    /// Pretty-print a control file as JSON
    Ppcf(PpcfArgs),
    /// Print every pack index entry, one per line
    Ppidx(PpidxArgs),
    /// Summarise a pack: entry counts per kind, total bytes
    Stat(StatArgs),
}

#[derive(Args)]
pub struct PpcfArgs {
    /// Path to the control file (e.g. store.control)
    pub path: String,
    /// Refuse legacy versions instead of upgrading them
    #[arg(long)]
    pub strict_v5: bool,
}

#[derive(Args)]
pub struct PpidxArgs {
    /// Pack base path (reads <base>.idx)
    pub base: String,
}

#[derive(Args)]
pub struct StatArgs {
    /// Pack base path (reads <base>.pack and <base>.idx)
    pub base: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_ppcf() {
        let cli = Cli::try_parse_from(["loam", "ppcf", "store.control"]).unwrap();
        if let Command::Ppcf(args) = cli.command {
            assert_eq!(args.path, "store.control");
            assert!(!args.strict_v5);
        } else {
            panic!("wrong command");
        }
    }

    #[test]
    fn parse_ppcf_strict() {
        let cli = Cli::try_parse_from(["loam", "ppcf", "--strict-v5", "c"]).unwrap();
        if let Command::Ppcf(args) = cli.command {
            assert!(args.strict_v5);
        } else {
            panic!("wrong command");
        }
    }

    #[test]
    fn parse_ppidx() {
        let cli = Cli::try_parse_from(["loam", "ppidx", "store"]).unwrap();
        assert!(matches!(cli.command, Command::Ppidx(_)));
    }

    #[test]
    fn parse_stat() {
        let cli = Cli::try_parse_from(["loam", "stat", "store"]).unwrap();
        assert!(matches!(cli.command, Command::Stat(_)));
    }

    #[test]
    fn parse_verbose() {
        let cli = Cli::try_parse_from(["loam", "--verbose", "stat", "store"]).unwrap();
        assert!(cli.verbose);
    }

    #[test]
    fn missing_argument_fails() {
        assert!(Cli::try_parse_from(["loam", "ppcf"]).is_err());
    }
}
