//! Scripted press/release sequences for unattended recording

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use crate::domain::errors::DomainError;
use crate::domain::model::Orientation;

/// One step of a recording script
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScriptStep {
    /// Press, keep holding for the duration, release
    Hold(Duration),
    /// Stay released
    Wait(Duration),
    /// Switch camera orientation
    Orient(Orientation),
}

impl fmt::Display for ScriptStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScriptStep::Hold(d) => write!(f, "hold:{}", d.as_millis()),
            ScriptStep::Wait(d) => write!(f, "wait:{}", d.as_millis()),
            ScriptStep::Orient(o) => write!(f, "orient:{}", o.degrees()),
        }
    }
}

impl FromStr for ScriptStep {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (verb, value) = s
            .trim()
            .split_once(':')
            .ok_or_else(|| DomainError::BadArgs(format!("Script step '{}' must look like verb:value", s)))?;

        let number = |value: &str| -> Result<u64, DomainError> {
            value
                .trim()
                .parse::<u64>()
                .map_err(|_| DomainError::BadArgs(format!("Invalid number in script step '{}'", s)))
        };

        match verb.trim().to_lowercase().as_str() {
            "hold" | "h" => Ok(ScriptStep::Hold(Duration::from_millis(number(value)?))),
            "wait" | "w" => Ok(ScriptStep::Wait(Duration::from_millis(number(value)?))),
            "orient" | "o" => {
                let degrees = value
                    .trim()
                    .parse::<i32>()
                    .map_err(|_| DomainError::BadArgs(format!("Invalid orientation in '{}'", s)))?;
                Ok(ScriptStep::Orient(Orientation::from_degrees(degrees)?))
            }
            other => Err(DomainError::BadArgs(format!("Unknown script verb '{}'", other))),
        }
    }
}

/// Parse a comma separated script such as `hold:2500,wait:500,hold:4000`
pub fn parse_script(script: &str) -> Result<Vec<ScriptStep>, DomainError> {
    let steps = script
        .split(',')
        .filter(|part| !part.trim().is_empty())
        .map(str::parse)
        .collect::<Result<Vec<ScriptStep>, _>>()?;
    if steps.is_empty() {
        return Err(DomainError::BadArgs("Script has no steps".to_string()));
    }
    Ok(steps)
}

/// Lines accepted on stdin in interactive mode
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsoleCommand {
    Press,
    Release,
    Orient(Orientation),
    Status,
    Quit,
}

impl FromStr for ConsoleCommand {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut parts = s.split_whitespace();
        let verb = parts.next().unwrap_or("");
        match verb {
            "p" | "press" => Ok(ConsoleCommand::Press),
            "r" | "release" => Ok(ConsoleCommand::Release),
            "s" | "status" => Ok(ConsoleCommand::Status),
            "q" | "quit" | "exit" => Ok(ConsoleCommand::Quit),
            "o" | "orient" => {
                let degrees = parts
                    .next()
                    .and_then(|d| d.parse::<i32>().ok())
                    .ok_or_else(|| DomainError::BadArgs("Usage: o <degrees>".to_string()))?;
                Ok(ConsoleCommand::Orient(Orientation::from_degrees(degrees)?))
            }
            "" => Err(DomainError::BadArgs("Empty command".to_string())),
            other => Err(DomainError::BadArgs(format!("Unknown command '{}'", other))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_script() {
        let steps = parse_script("hold:2500, wait:500,orient:90,h:100").unwrap();
        assert_eq!(
            steps,
            vec![
                ScriptStep::Hold(Duration::from_millis(2500)),
                ScriptStep::Wait(Duration::from_millis(500)),
                ScriptStep::Orient(Orientation::PORTRAIT),
                ScriptStep::Hold(Duration::from_millis(100)),
            ]
        );
        assert_eq!(steps[0].to_string(), "hold:2500");
    }

    #[test]
    fn test_parse_script_errors() {
        assert!(parse_script("").is_err());
        assert!(parse_script("hold").is_err());
        assert!(parse_script("hold:abc").is_err());
        assert!(parse_script("jump:10").is_err());
        assert!(parse_script("orient:45").is_err());
    }

    #[test]
    fn test_console_commands() {
        assert_eq!("p".parse::<ConsoleCommand>().unwrap(), ConsoleCommand::Press);
        assert_eq!("release".parse::<ConsoleCommand>().unwrap(), ConsoleCommand::Release);
        assert_eq!(
            "o 270".parse::<ConsoleCommand>().unwrap(),
            ConsoleCommand::Orient(Orientation::from_degrees(270).unwrap())
        );
        assert!("o".parse::<ConsoleCommand>().is_err());
        assert!("x".parse::<ConsoleCommand>().is_err());
    }
}
