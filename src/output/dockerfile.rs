//! Render a [`BuildPlan`] as a three-stage Dockerfile

use super::schema::{BuildPlan, BuildStep};
use std::collections::BTreeMap;
use std::fmt::Write;

const SYNTAX: &str = "# syntax=docker/dockerfile:1.4";

fn json_array(items: &[String]) -> String {
    serde_json::to_string(items).unwrap_or_else(|_| "[]".to_string())
}

fn env_value(value: &str) -> String {
    if value.is_empty() || value.chars().any(|c| c.is_whitespace() || c == '"' || c == '\\') {
        format!("{:?}", value)
    } else {
        value.to_string()
    }
}

/// `ENV` instruction for the variables in `env` that `inherited` doesn't
/// already carry with the same value
fn env_block(out: &mut String, env: &BTreeMap<String, String>, inherited: &BTreeMap<String, String>) {
    let added: Vec<String> = env
        .iter()
        .filter(|(k, v)| inherited.get(*k) != Some(*v))
        .map(|(k, v)| format!("{}={}", k, env_value(v)))
        .collect();
    if added.is_empty() {
        return;
    }
    let _ = writeln!(out, "ENV {}", added.join(" \\\n    "));
    out.push('\n');
}

/// Heredoc delimiter that does not occur in `content`
fn delimiter(content: &str) -> String {
    let mut delim = "EOF".to_string();
    while content.lines().any(|l| l == delim) {
        delim.push('_');
    }
    delim
}

pub fn render(plan: &BuildPlan) -> String {
    let mut out = String::new();
    let none = BTreeMap::new();

    let _ = writeln!(out, "{}", SYNTAX);
    let _ = writeln!(out, "FROM {} AS base", plan.base.image);
    out.push('\n');
    env_block(&mut out, &plan.base.env, &none);
    let _ = writeln!(out, "WORKDIR {}", plan.base.workdir);
    out.push('\n');

    let _ = writeln!(out, "FROM base AS builder");
    out.push('\n');
    env_block(&mut out, &plan.builder.env, &plan.base.env);
    for step in &plan.builder.steps {
        match step {
            BuildStep::Run { argv } => {
                let _ = writeln!(out, "RUN {}", json_array(argv));
            }
            BuildStep::Copy { sources, dest } => {
                let _ = writeln!(out, "COPY {} {}", sources.join(" "), dest);
            }
            BuildStep::WriteFile { path, content } => {
                let delim = delimiter(content);
                let _ = writeln!(out, "COPY <<{} {}", delim, path);
                out.push_str(content);
                if !content.is_empty() && !content.ends_with('\n') {
                    out.push('\n');
                }
                let _ = writeln!(out, "{}", delim);
            }
        }
    }
    out.push('\n');

    let final_stage = &plan.final_stage;
    let _ = writeln!(out, "FROM base AS final");
    out.push('\n');
    env_block(&mut out, &final_stage.env, &plan.base.env);
    for copy in &final_stage.copy {
        let _ = writeln!(out, "COPY --from=builder {} {}", copy.from, copy.to);
    }
    for port in &final_stage.ports {
        let _ = writeln!(out, "EXPOSE {}", port);
    }
    if let Some(ref healthcheck) = final_stage.healthcheck {
        let test = match healthcheck.test.split_first() {
            Some((kind, rest)) if kind == "CMD" => json_array(rest),
            _ => json_array(&healthcheck.test),
        };
        let _ = writeln!(
            out,
            "HEALTHCHECK --interval={} --timeout={} --retries={} CMD {}",
            healthcheck.interval, healthcheck.timeout, healthcheck.retries, test
        );
    }
    let _ = writeln!(out, "CMD {}", json_array(&final_stage.command));

    out
}
