//! Package installation tools.

use crate::tool_args::ToolArgs;

/// `pacstrap -K <root> <packages…>`: one bulk install into the mounted tree
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pacstrap {
    pub root: String,
    pub packages: Vec<String>,
}

impl ToolArgs for Pacstrap {
    fn program(&self) -> &'static str {
        "pacstrap"
    }

    fn to_cli_args(&self) -> Vec<String> {
        let mut args = vec!["-K".to_string(), self.root.clone()];
        args.extend(self.packages.iter().cloned());
        args
    }
}

/// `pacman` operations run inside the target
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Pacman {
    /// `-S --noconfirm --needed <packages…>`
    Install { packages: Vec<String> },
    /// `-Sy --noconfirm`
    Refresh,
}

impl ToolArgs for Pacman {
    fn program(&self) -> &'static str {
        "pacman"
    }

    fn to_cli_args(&self) -> Vec<String> {
        match self {
            Self::Install { packages } => {
                let mut args = vec![
                    "-S".to_string(),
                    "--noconfirm".to_string(),
                    "--needed".to_string(),
                ];
                args.extend(packages.iter().cloned());
                args
            }
            Self::Refresh => vec!["-Sy".to_string(), "--noconfirm".to_string()],
        }
    }
}
