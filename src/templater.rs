// templater.rs - Command template rendering
// Purpose: Turn a task's command template into the exact shell line a job runs,
//          pointing its output designation at a per-(tool, task, index) file

use lazy_static::lazy_static;
use regex::{Captures, Regex};
use std::path::{Path, PathBuf};
use thiserror::Error;

pub const TARGET_PLACEHOLDER: &str = "{target}";
pub const OUTPUT_PLACEHOLDER: &str = "{output}";
pub const WORDLIST_PLACEHOLDER: &str = "{wordlist}";
pub const PAYLOAD_PLACEHOLDER: &str = "{payload}";

const DEFAULT_EXTENSION: &str = ".txt";

lazy_static! {
    /// `-o`, `-oN`, `-oG` followed by a path
    static ref OUTPUT_FLAG: Regex = Regex::new(r"(^|\s)(-o(?:N|G)?\s+)(\S+)").unwrap();
    /// stdout redirection (`>` or `>>`); fd-qualified forms like `2>` are not matched
    static ref REDIRECT: Regex = Regex::new(r"(^|\s)(>>?\s*)([^\s;|&]+)").unwrap();
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TemplateError {
    #[error("`{template}` needs a {placeholder} binding but none was supplied")]
    MissingPlaceholderBinding {
        template: String,
        placeholder: &'static str,
    },
    #[error("empty command template")]
    EmptyTemplate,
}

/// Values substituted into a template for one job
#[derive(Debug, Clone, Copy)]
pub struct Bindings<'a> {
    pub target: &'a str,
    pub output_dir: &'a Path,
    pub wordlist: Option<&'a Path>,
    pub payload: Option<&'a Path>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedCommand {
    pub tool: String,
    pub command: String,
    pub result_file: PathBuf,
    /// Whether the template itself writes `result_file` (via `-o*` or `>`)
    pub has_output_designation: bool,
}

/// Seam between the scheduler and the textual rewriting below
pub trait CommandRenderer: Send + Sync {
    fn render(
        &self,
        template: &str,
        task: &str,
        bindings: &Bindings<'_>,
        index: &str,
    ) -> Result<RenderedCommand, TemplateError>;
}

/// Regex-based renderer used by default
#[derive(Debug, Clone, Copy, Default)]
pub struct TemplateRenderer;

impl CommandRenderer for TemplateRenderer {
    fn render(
        &self,
        template: &str,
        task: &str,
        bindings: &Bindings<'_>,
        index: &str,
    ) -> Result<RenderedCommand, TemplateError> {
        render(template, task, bindings, index)
    }
}

/// "Automated Port Scanning" -> "automated_port_scanning"
pub fn task_slug(task: &str) -> String {
    task.replace(' ', "_").to_lowercase()
}

/// First token of the template, reduced to its file name when it is a path
pub fn tool_name(template: &str) -> Option<String> {
    let first = template.split_whitespace().next()?;
    let name = Path::new(first)
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or(first);
    Some(name.to_string())
}

/// Tool names of every stage in `a | b | c`; `||` is not a pipe
pub fn pipeline_tools(template: &str) -> Vec<String> {
    template
        .split('|')
        .filter(|stage| !stage.trim().is_empty())
        .filter_map(tool_name)
        .collect()
}

/// Tool name plus the extension its output file should carry
pub fn tool_and_extension(template: &str) -> Option<(String, String)> {
    let tool = tool_name(template)?;
    let designated = output_flag_target(template).or_else(|| redirect_target(template));
    let ext = designated
        .and_then(|path| Path::new(path).extension().and_then(|e| e.to_str()).map(|e| format!(".{}", e)))
        .unwrap_or_else(|| DEFAULT_EXTENSION.to_string());
    Some((tool, ext))
}

/// Render `template` for one job
pub fn render(
    template: &str,
    task: &str,
    bindings: &Bindings<'_>,
    index: &str,
) -> Result<RenderedCommand, TemplateError> {
    let (tool, ext) = tool_and_extension(template).ok_or(TemplateError::EmptyTemplate)?;

    let mut command = template
        .replace(TARGET_PLACEHOLDER, bindings.target)
        .replace(OUTPUT_PLACEHOLDER, &bindings.output_dir.display().to_string());
    command = bind(command, template, WORDLIST_PLACEHOLDER, bindings.wordlist)?;
    command = bind(command, template, PAYLOAD_PLACEHOLDER, bindings.payload)?;

    let result_file = bindings
        .output_dir
        .join(format!("{}_{}_{}{}", tool, task_slug(task), index, ext));
    let result_str = result_file.display().to_string();

    let (command, has_output_designation) = if OUTPUT_FLAG.is_match(&command) {
        let rewritten = OUTPUT_FLAG
            .replace_all(&command, |caps: &Captures| format!("{}{}{}", &caps[1], &caps[2], result_str))
            .into_owned();
        (rewritten, true)
    } else if redirect_target(&command).is_some() {
        let rewritten = REDIRECT
            .replace_all(&command, |caps: &Captures| {
                if is_device(&caps[3]) {
                    caps[0].to_string()
                } else {
                    format!("{}{} {}", &caps[1], caps[2].trim_end(), result_str)
                }
            })
            .into_owned();
        (rewritten, true)
    } else {
        (command, false)
    };

    Ok(RenderedCommand {
        tool,
        command,
        result_file,
        has_output_designation,
    })
}

fn bind(
    command: String,
    template: &str,
    placeholder: &'static str,
    value: Option<&Path>,
) -> Result<String, TemplateError> {
    if !command.contains(placeholder) {
        return Ok(command);
    }
    match value {
        Some(path) => Ok(command.replace(placeholder, &path.display().to_string())),
        None => Err(TemplateError::MissingPlaceholderBinding {
            template: template.to_string(),
            placeholder,
        }),
    }
}

fn output_flag_target(command: &str) -> Option<&str> {
    OUTPUT_FLAG
        .captures(command)
        .and_then(|caps| caps.get(3))
        .map(|m| m.as_str())
}

fn redirect_target(command: &str) -> Option<&str> {
    REDIRECT
        .captures_iter(command)
        .filter_map(|caps| caps.get(3))
        .map(|m| m.as_str())
        .find(|target| !is_device(target))
}

fn is_device(path: &str) -> bool {
    path.starts_with("/dev/")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bindings<'a>(target: &'a str, out: &'a Path) -> Bindings<'a> {
        Bindings {
            target,
            output_dir: out,
            wordlist: None,
            payload: None,
        }
    }

    #[test]
    fn test_output_flag_is_rewritten() {
        let out = Path::new("/tmp/out");
        let rendered = render(
            "nmap {target} -oN {output}/scan.txt",
            "Port Scan",
            &bindings("example.com", out),
            "1",
        )
        .unwrap();

        assert_eq!(rendered.command, "nmap example.com -oN /tmp/out/nmap_port_scan_1.txt");
        assert_eq!(rendered.result_file, PathBuf::from("/tmp/out/nmap_port_scan_1.txt"));
        assert_eq!(rendered.tool, "nmap");
        assert!(rendered.has_output_designation);
    }

    #[test]
    fn test_extension_follows_output_flag() {
        let (tool, ext) = tool_and_extension("nmap -sV {target} -oG {output}/ports/nmap.gnmap").unwrap();
        assert_eq!(tool, "nmap");
        assert_eq!(ext, ".gnmap");

        let (_, ext) = tool_and_extension("subfinder -d {target} -o {output}/subdomains/subfinder").unwrap();
        assert_eq!(ext, ".txt");
    }

    #[test]
    fn test_redirect_is_rewritten() {
        let out = Path::new("/tmp/out");
        let rendered = render(
            "echo Hello {target} > {output}/logs/echo.json",
            "Test Task",
            &bindings("example.com", out),
            "2",
        )
        .unwrap();

        assert_eq!(
            rendered.command,
            "echo Hello example.com > /tmp/out/echo_test_task_2.json"
        );
        assert!(rendered.has_output_designation);
    }

    #[test]
    fn test_append_redirect_keeps_operator() {
        let out = Path::new("/o");
        let rendered = render("assetfinder {target} >> {output}/a.txt", "Subs", &bindings("x.com", out), "1").unwrap();
        assert_eq!(rendered.command, "assetfinder x.com >> /o/assetfinder_subs_1.txt");
    }

    #[test]
    fn test_stderr_and_device_redirects_untouched() {
        let out = Path::new("/o");
        let rendered = render(
            "amass enum -passive -d {target} 2>/dev/null > /dev/null",
            "Subs",
            &bindings("x.com", out),
            "1",
        )
        .unwrap();

        assert_eq!(rendered.command, "amass enum -passive -d x.com 2>/dev/null > /dev/null");
        assert!(!rendered.has_output_designation);
        assert_eq!(rendered.result_file, PathBuf::from("/o/amass_subs_1.txt"));
    }

    #[test]
    fn test_template_without_designation_only_substitutes() {
        let out = Path::new("/o");
        let rendered = render("whatweb {target}", "Fingerprint", &bindings("x.com", out), "3").unwrap();
        assert_eq!(rendered.command, "whatweb x.com");
        assert!(!rendered.has_output_designation);
    }

    #[test]
    fn test_missing_wordlist_binding_fails() {
        let out = Path::new("/o");
        let err = render("ffuf -u https://{target}/FUZZ -w {wordlist}", "Dirs", &bindings("x.com", out), "1")
            .unwrap_err();
        assert!(matches!(
            err,
            TemplateError::MissingPlaceholderBinding { placeholder: WORDLIST_PLACEHOLDER, .. }
        ));
    }

    #[test]
    fn test_wordlist_and_payload_are_substituted() {
        let out = Path::new("/o");
        let b = Bindings {
            target: "x.com",
            output_dir: out,
            wordlist: Some(Path::new("/w/common.txt")),
            payload: Some(Path::new("/p/xss.txt")),
        };
        let rendered = render(
            "dalfox file {wordlist} --custom-payload {payload} -o {output}/xss.txt",
            "XSS",
            &b,
            "1_common",
        )
        .unwrap();
        assert_eq!(
            rendered.command,
            "dalfox file /w/common.txt --custom-payload /p/xss.txt -o /o/dalfox_xss_1_common.txt"
        );
    }

    #[test]
    fn test_sibling_indexes_never_collide() {
        let out = Path::new("/o");
        let a = render("nmap {target} -oN {output}/scan.txt", "Ports", &bindings("x.com", out), "1").unwrap();
        let b = render("nmap {target} -oN {output}/scan.txt", "Ports", &bindings("x.com", out), "2").unwrap();
        assert_ne!(a.result_file, b.result_file);
    }

    #[test]
    fn test_tool_path_reduced_to_file_name() {
        assert_eq!(tool_name("/opt/tools/SecretFinder.py -i {target}").unwrap(), "SecretFinder.py");
        assert!(tool_name("   ").is_none());
        assert_eq!(
            render("  ", "T", &bindings("x.com", Path::new("/o")), "1").unwrap_err(),
            TemplateError::EmptyTemplate
        );
    }

    #[test]
    fn test_pipeline_tools() {
        assert_eq!(pipeline_tools("gau {target} | kxss > {output}/k.txt"), vec!["gau", "kxss"]);
        assert_eq!(pipeline_tools("nmap {target}"), vec!["nmap"]);
        assert_eq!(pipeline_tools("a || b"), vec!["a", "b"]);
    }

    /// Templates whose output another template reads break once `-o`/`>`
    /// targets are rewritten, so every shipped command must stand alone
    #[test]
    fn test_default_task_table_commands_are_self_contained() {
        let table = crate::config::TaskTable::from_json_str(include_str!("../config/tasks.json")).unwrap();
        let out = Path::new("/o/a.com");

        let designations = |cmd: &str| -> Vec<String> {
            OUTPUT_FLAG
                .captures_iter(cmd)
                .chain(REDIRECT.captures_iter(cmd))
                .map(|caps| caps[3].to_string())
                .filter(|t| !is_device(t))
                .collect()
        };

        let commands: Vec<(&str, &str)> = table
            .iter()
            .flat_map(|task| task.commands.iter().map(move |c| (task.name.as_str(), c.as_str())))
            .collect();

        for (task, cmd) in &commands {
            for target in designations(cmd) {
                assert!(target.starts_with("{output}/"), "{}: `{}` is not an output path", task, target);
                for (_, other) in commands.iter().filter(|(_, c)| c != cmd) {
                    assert!(!other.contains(&target), "`{}` reads {} written by `{}`", other, target, cmd);
                }
            }
            assert!(!cmd.contains("all_subdomains.txt") && !cmd.contains("live_subdomains.txt"));

            let rendered = render(cmd, task, &bindings("a.com", out), "1");
            if task.starts_with("Automated Subdomain Enumeration") {
                assert!(rendered.unwrap().has_output_designation, "{} has no output designation", cmd);
            }
        }
    }

    #[test]
    fn test_renderer_trait_delegates() {
        let renderer: &dyn CommandRenderer = &TemplateRenderer;
        let rendered = renderer
            .render("httpx -u {target}", "Probe", &bindings("x.com", Path::new("/o")), "1")
            .unwrap();
        assert_eq!(rendered.command, "httpx -u x.com");
    }
}
