//! This module defines the `Command` enum and its associated methods for parsing
//! and handling user commands of the volume shell.
//!
//! The `Command` enum represents the commands the user can input, such as listing or
//! changing the current directory, creating and removing entries, moving files in and out
//! of the image, checking and repairing the volume, or handling invalid or unknown input.

/// Help text printed by the `help` command.
pub const HELP: &str = "\
ls [-l] [path]        list a directory
cd <path>             change the current directory
md <path>             create a directory
cf <path>             create an empty file
rm <path>             remove a file or a directory with its content
cat <path>            print a file
import <host> [dir]   copy a host file into the image
export <path> <host>  copy a file of the image to the host
fschk                 check the consistency of the volume
fix                   repair the volume
layout                print the volume layout
bpb                   print the boot sector fields
help                  print this help
quit                  leave the shell";

/// Represents a user command of the volume shell.
#[derive(Debug, PartialEq, Eq)]
pub enum Command {
    /// List a directory, the current one by default, optionally with details.
    Ls { long: bool, path: Option<String> },
    /// Change the current directory.
    Cd(String),
    /// Create a directory.
    Md(String),
    /// Create an empty file.
    Cf(String),
    /// Remove a file or a directory tree.
    Rm(String),
    /// Print the content of a file.
    Cat(String),
    /// Copy a host file into a directory of the image, the current one by default.
    Import { host: String, dir: Option<String> },
    /// Copy a file of the image to the host.
    Export { path: String, host: String },
    /// Check the volume.
    Fschk,
    /// Repair the volume.
    Fix,
    /// Print the volume layout.
    Layout,
    /// Print the boot sector fields.
    Bpb,
    Help,
    /// Command to quit the program.
    Quit,
    /// Command for an unknown input, encapsulating the raw input as a `String`.
    Unknown(String),
    /// Command for invalid input, encapsulating an error message as a `String`.
    Invalid(String),
    /// Command for an empty input.
    Empty,
}

/// Parses the single path argument of `cmd`.
fn one_path<'a>(
    cmd: &str,
    mut parts: impl Iterator<Item = &'a str>,
    build: fn(String) -> Command,
) -> Command {
    match parts.next() {
        Some(arg) => build(arg.to_string()),
        None => Command::Invalid(format!("Missing arg: '{cmd}' expects a path.")),
    }
}

impl Command {
    /// Parses a string into a `Command` instance.
    ///
    /// # Parameters
    /// - `s`: A string slice representing the user input.
    ///
    /// # Returns
    /// - The matching command with its arguments.
    /// - `Command::Invalid` if a required argument is missing.
    /// - `Command::Unknown` if the input does not match any known command.
    /// - `Command::Empty` if the input is empty or contains only whitespace.
    pub fn from_string(s: &str) -> Self {
        let mut parts = s.split_whitespace();
        match parts.next() {
            Some("ls") => {
                let mut long = false;
                let mut path = None;
                for arg in parts {
                    match arg {
                        "-l" => long = true,
                        other => path = Some(other.to_string()),
                    }
                }
                Command::Ls { long, path }
            }
            Some("cd") => one_path("cd", parts, Command::Cd),
            Some("md") => one_path("md", parts, Command::Md),
            Some("cf") => one_path("cf", parts, Command::Cf),
            Some("rm") => one_path("rm", parts, Command::Rm),
            Some("cat") => one_path("cat", parts, Command::Cat),
            Some("import") => match parts.next() {
                Some(host) => Command::Import {
                    host: host.to_string(),
                    dir: parts.next().map(str::to_string),
                },
                None => Command::Invalid(String::from(
                    "Missing arg: 'import' expects the path of a host file.",
                )),
            },
            Some("export") => match (parts.next(), parts.next()) {
                (Some(path), Some(host)) => Command::Export {
                    path: path.to_string(),
                    host: host.to_string(),
                },
                _ => Command::Invalid(String::from(
                    "Missing arg: 'export' expects a file of the image and a host path.",
                )),
            },
            Some("fschk") => Command::Fschk,
            Some("fix") => Command::Fix,
            Some("layout") => Command::Layout,
            Some("bpb") => Command::Bpb,
            Some("help") => Command::Help,
            Some("quit") | Some("exit") => Command::Quit,
            Some(other) => Command::Unknown(other.to_string()),
            None => Command::Empty,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ls_flags_and_path() {
        assert_eq!(
            Command::from_string("ls"),
            Command::Ls {
                long: false,
                path: None
            }
        );
        assert_eq!(
            Command::from_string("  ls -l /docs \n"),
            Command::Ls {
                long: true,
                path: Some(String::from("/docs"))
            }
        );
    }

    #[test]
    fn path_commands() {
        assert_eq!(Command::from_string("cd .."), Command::Cd(String::from("..")));
        assert_eq!(Command::from_string("rm a/b"), Command::Rm(String::from("a/b")));
        assert!(matches!(Command::from_string("md"), Command::Invalid(_)));
    }

    #[test]
    fn transfers() {
        assert_eq!(
            Command::from_string("import notes.txt /docs"),
            Command::Import {
                host: String::from("notes.txt"),
                dir: Some(String::from("/docs"))
            }
        );
        assert!(matches!(Command::from_string("export a"), Command::Invalid(_)));
    }

    #[test]
    fn other_input() {
        assert_eq!(Command::from_string("   "), Command::Empty);
        assert_eq!(Command::from_string("fix"), Command::Fix);
        assert_eq!(Command::from_string("bpb"), Command::Bpb);
        assert_eq!(
            Command::from_string("format c:"),
            Command::Unknown(String::from("format"))
        );
    }
}
