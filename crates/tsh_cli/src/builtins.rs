//! Built-in commands: recognition and the job-control actions they trigger.

use std::io::Write;
use std::path::Path;

use anyhow::{anyhow, bail, Context, Result};
use tsh_jobs::{Job, JobControl, JobId, JobState};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Builtin {
    Quit,
    Cd(Option<String>),
    Jobs,
    Fg(Option<String>),
    Bg(Option<String>),
}

/// What the main loop should do after a builtin ran.
#[derive(Debug, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Exit,
}

impl Builtin {
    /// Recognize a builtin from a command's argument vector.
    pub fn recognize(argv: &[String]) -> Option<Self> {
        let (name, rest) = argv.split_first()?;
        let arg = rest.first().cloned();
        match name.as_str() {
            "quit" | "exit" => Some(Builtin::Quit),
            "cd" => Some(Builtin::Cd(arg)),
            "jobs" => Some(Builtin::Jobs),
            "fg" => Some(Builtin::Fg(arg)),
            "bg" => Some(Builtin::Bg(arg)),
            _ => None,
        }
    }

    pub fn run(&self, jobs: &JobControl, out: &mut impl Write) -> Result<Flow> {
        match self {
            Builtin::Quit => return Ok(Flow::Exit),
            Builtin::Cd(dir) => {
                let dir = dir.as_deref().ok_or_else(|| anyhow!("cd: missing directory"))?;
                std::env::set_current_dir(Path::new(dir))
                    .with_context(|| format!("cd: {}", dir))?;
            }
            Builtin::Jobs => {
                for job in jobs.list_jobs() {
                    writeln!(out, "{}", format_job(&job))?;
                }
            }
            Builtin::Fg(arg) => {
                let jid = job_arg("fg", arg.as_deref())?;
                jobs.resume(jid, JobState::Foreground)?;
            }
            Builtin::Bg(arg) => {
                let jid = job_arg("bg", arg.as_deref())?;
                jobs.resume(jid, JobState::Background)?;
                if let Some(job) = jobs.job_for_id(jid) {
                    writeln!(out, "{}", launch_notice(&job))?;
                }
            }
        }
        Ok(Flow::Continue)
    }
}

fn job_arg(command: &str, arg: Option<&str>) -> Result<JobId> {
    let arg = arg.ok_or_else(|| anyhow!("{}: missing job argument", command))?;
    parse_job_ref(arg).with_context(|| command.to_string())
}

/// Parse `N` or `%N` into a job id.
pub fn parse_job_ref(arg: &str) -> Result<JobId> {
    let digits = arg.strip_prefix('%').unwrap_or(arg);
    match digits.parse::<u32>() {
        Ok(n) if n > 0 => Ok(JobId(n)),
        _ => bail!("job id is incorrect: {}", arg),
    }
}

/// One `jobs` line: `jid: State command`.
pub fn format_job(job: &Job) -> String {
    format!("{}: {} {}", job.jid, job.state, job.command_line)
}

/// Printed when a job starts or continues in the background.
pub fn launch_notice(job: &Job) -> String {
    format!("Background <{}>: {}", job.jid, job.command_line)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn argv(raw: &[&str]) -> Vec<String> {
        raw.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_recognize_builtins() {
        assert_eq!(Builtin::recognize(&argv(&["quit"])), Some(Builtin::Quit));
        assert_eq!(Builtin::recognize(&argv(&["exit", "0"])), Some(Builtin::Quit));
        assert_eq!(Builtin::recognize(&argv(&["jobs"])), Some(Builtin::Jobs));
        assert_eq!(
            Builtin::recognize(&argv(&["cd", "/tmp"])),
            Some(Builtin::Cd(Some("/tmp".into())))
        );
        assert_eq!(Builtin::recognize(&argv(&["fg"])), Some(Builtin::Fg(None)));
        assert_eq!(
            Builtin::recognize(&argv(&["bg", "%2"])),
            Some(Builtin::Bg(Some("%2".into())))
        );
    }

    #[test]
    fn test_external_commands_are_not_builtins() {
        assert_eq!(Builtin::recognize(&argv(&["ls", "-l"])), None);
        assert_eq!(Builtin::recognize(&argv(&["jobsx"])), None);
        assert_eq!(Builtin::recognize(&[]), None);
    }

    #[test]
    fn test_parse_job_ref() {
        assert_eq!(parse_job_ref("3").unwrap(), JobId(3));
        assert_eq!(parse_job_ref("%12").unwrap(), JobId(12));
        assert!(parse_job_ref("%").is_err());
        assert!(parse_job_ref("0").is_err());
        assert!(parse_job_ref("-1").is_err());
        assert!(parse_job_ref("abc").is_err());
    }

    #[test]
    fn test_missing_job_argument() {
        let err = job_arg("fg", None).unwrap_err();
        assert_eq!(err.to_string(), "fg: missing job argument");
        let err = job_arg("bg", Some("%x")).unwrap_err();
        assert_eq!(err.to_string(), "bg");
        assert!(format!("{:#}", err).contains("job id is incorrect: %x"));
    }

    #[test]
    fn test_job_lines() {
        let mut table = tsh_jobs::JobTable::new(4);
        let pid = tsh_jobs::Pid::from_raw(4242);
        let jid = table.add(pid, pid, JobState::Background, "sleep 5 &").unwrap();
        let job = table.by_jid(jid).unwrap();
        assert_eq!(format_job(job), "1: Running sleep 5 &");
        assert_eq!(launch_notice(job), "Background <1>: sleep 5 &");

        table.set_state(jid, JobState::Stopped).unwrap();
        let job = table.by_jid(jid).unwrap();
        assert_eq!(format_job(job), "1: Stopped sleep 5 &");
    }
}
