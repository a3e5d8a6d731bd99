//! Top-level command keywords

/// Fixed commands recognized in any stage
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Greeting,
    Help,
    Total,
    Manual,
    Cancel,
}

impl Command {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Greeting => "hi",
            Self::Help => "help",
            Self::Total => "total",
            Self::Manual => "manual",
            Self::Cancel => "cancel",
        }
    }

    /// Parse a message as a command (case-insensitive, optional leading `/`)
    pub fn parse(text: &str) -> Option<Self> {
        let word = text.trim().trim_start_matches('/').to_lowercase();
        match word.as_str() {
            "hi" | "hello" | "hey" | "start" | "merhaba" => Some(Self::Greeting),
            "help" | "info" | "?" | "yardım" | "yardim" => Some(Self::Help),
            "total" | "balance" | "summary" | "toplam" => Some(Self::Total),
            "manual" | "manual_entry" => Some(Self::Manual),
            "cancel" | "stop" | "iptal" => Some(Self::Cancel),
            _ => None,
        }
    }
}

impl std::fmt::Display for Command {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_aliases() {
        assert_eq!(Command::parse("Hello"), Some(Command::Greeting));
        assert_eq!(Command::parse("/start"), Some(Command::Greeting));
        assert_eq!(Command::parse("info"), Some(Command::Help));
        assert_eq!(Command::parse(" BALANCE "), Some(Command::Total));
        assert_eq!(Command::parse("manual"), Some(Command::Manual));
        assert_eq!(Command::parse("CANCEL"), Some(Command::Cancel));
    }

    #[test]
    fn test_non_commands() {
        assert_eq!(Command::parse("what is my total"), None);
        assert_eq!(Command::parse("250"), None);
        assert_eq!(Command::parse(""), None);
    }
}
