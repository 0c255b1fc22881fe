use crate::error::{IntakeError, Result};

#[derive(Debug, Clone, PartialEq)]
pub enum SmtpCommand {
    Helo(String),
    Ehlo(String),
    MailFrom(String),
    RcptTo(String),
    Data,
    Rset,
    Quit,
    Noop,
    Unknown(String),
}

impl SmtpCommand {
    pub fn parse(line: &str) -> Result<Self> {
        let line = line.trim();
        if line.is_empty() {
            return Err(IntakeError::SmtpProtocol("Empty command".to_string()));
        }

        let (command, args) = match line.split_once(' ') {
            Some((command, args)) => (command.to_uppercase(), args.trim()),
            None => (line.to_uppercase(), ""),
        };

        match command.as_str() {
            "HELO" => {
                if args.is_empty() {
                    return Err(IntakeError::SmtpProtocol("HELO requires domain".to_string()));
                }
                Ok(SmtpCommand::Helo(args.to_string()))
            }
            "EHLO" => {
                if args.is_empty() {
                    return Err(IntakeError::SmtpProtocol("EHLO requires domain".to_string()));
                }
                Ok(SmtpCommand::Ehlo(args.to_string()))
            }
            "MAIL" => Ok(SmtpCommand::MailFrom(Self::parse_path(args, "FROM:")?)),
            "RCPT" => {
                let to = Self::parse_path(args, "TO:")?;
                if to.is_empty() {
                    return Err(IntakeError::SmtpProtocol("Empty recipient".to_string()));
                }
                Ok(SmtpCommand::RcptTo(to))
            }
            "DATA" => Ok(SmtpCommand::Data),
            "RSET" => Ok(SmtpCommand::Rset),
            "QUIT" => Ok(SmtpCommand::Quit),
            "NOOP" => Ok(SmtpCommand::Noop),
            _ => Ok(SmtpCommand::Unknown(command)),
        }
    }

    /// Parse `FROM:<addr> [params]` / `TO:<addr> [params]`. ESMTP parameters
    /// such as `SIZE=` or `BODY=8BITMIME` are accepted and ignored. The null
    /// reverse-path `<>` yields an empty address.
    fn parse_path(args: &str, keyword: &str) -> Result<String> {
        let prefix = args.get(..keyword.len());
        if !prefix.is_some_and(|p| p.eq_ignore_ascii_case(keyword)) {
            return Err(IntakeError::SmtpProtocol(format!(
                "Invalid syntax, expected {}<address>",
                keyword
            )));
        }

        let rest = args[keyword.len()..].trim_start();
        let address = match rest.strip_prefix('<') {
            Some(inner) => inner
                .split_once('>')
                .map(|(addr, _)| addr)
                .ok_or_else(|| IntakeError::SmtpProtocol("Unterminated address".to_string()))?,
            None => rest.split_whitespace().next().unwrap_or(""),
        };

        Ok(address.trim().to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_helo() {
        let cmd = SmtpCommand::parse("HELO example.com").unwrap();
        assert_eq!(cmd, SmtpCommand::Helo("example.com".to_string()));
    }

    #[test]
    fn test_parse_ehlo_lowercase() {
        let cmd = SmtpCommand::parse("ehlo scanner.local").unwrap();
        assert_eq!(cmd, SmtpCommand::Ehlo("scanner.local".to_string()));
    }

    #[test]
    fn test_helo_requires_domain() {
        assert!(SmtpCommand::parse("HELO").is_err());
    }

    #[test]
    fn test_parse_mail_from() {
        let cmd = SmtpCommand::parse("MAIL FROM:<sender@example.com>").unwrap();
        assert_eq!(cmd, SmtpCommand::MailFrom("sender@example.com".to_string()));
    }

    #[test]
    fn test_parse_mail_from_with_params_and_space() {
        let cmd = SmtpCommand::parse("MAIL FROM: <scanner@example.com> SIZE=1024 BODY=8BITMIME")
            .unwrap();
        assert_eq!(cmd, SmtpCommand::MailFrom("scanner@example.com".to_string()));
    }

    #[test]
    fn test_parse_null_sender() {
        let cmd = SmtpCommand::parse("MAIL FROM:<>").unwrap();
        assert_eq!(cmd, SmtpCommand::MailFrom(String::new()));
    }

    #[test]
    fn test_parse_rcpt_to() {
        let cmd = SmtpCommand::parse("RCPT TO:<recipient@example.com>").unwrap();
        assert_eq!(cmd, SmtpCommand::RcptTo("recipient@example.com".to_string()));
    }

    #[test]
    fn test_parse_rcpt_without_brackets() {
        let cmd = SmtpCommand::parse("rcpt to:drop@example.com").unwrap();
        assert_eq!(cmd, SmtpCommand::RcptTo("drop@example.com".to_string()));
    }

    #[test]
    fn test_invalid_mail_syntax() {
        assert!(SmtpCommand::parse("MAIL sender@example.com").is_err());
        assert!(SmtpCommand::parse("MAIL FROM:<unterminated").is_err());
        assert!(SmtpCommand::parse("RCPT TO:<>").is_err());
    }

    #[test]
    fn test_parse_data_and_quit() {
        assert_eq!(SmtpCommand::parse("DATA").unwrap(), SmtpCommand::Data);
        assert_eq!(SmtpCommand::parse("quit").unwrap(), SmtpCommand::Quit);
        assert_eq!(SmtpCommand::parse("RSET").unwrap(), SmtpCommand::Rset);
        assert_eq!(SmtpCommand::parse("NOOP").unwrap(), SmtpCommand::Noop);
    }

    #[test]
    fn test_parse_unknown() {
        let cmd = SmtpCommand::parse("VRFY postmaster").unwrap();
        assert_eq!(cmd, SmtpCommand::Unknown("VRFY".to_string()));
    }

    #[test]
    fn test_parse_empty() {
        assert!(SmtpCommand::parse("   ").is_err());
    }
}
