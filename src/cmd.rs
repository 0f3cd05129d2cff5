//! Operator command surface.
//!
//! A thin parsing layer: each input line becomes a validated [`Command`]
//! routed to one orchestrator operation. Parsing is pure and unit-tested;
//! dispatch is glue.

use crate::orchestrator::Orchestrator;
use regex::Regex;
use std::collections::HashMap;
use std::sync::LazyLock;

static ANSWER_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(Q\d+):\s*([^,]+)").expect("valid regex"));

/// Which object an approve/reject verb addresses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApprovalTarget {
    Spec,
    Plan,
    Tasks,
    Code,
    Task,
}

/// A validated operator command.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    NewFeature { name: String, description: String },
    ListFeatures,
    FeatureStatus { id: String },
    SetTechStack { id: String, tech_stack: String },
    Answer { id: String, answers: HashMap<String, String> },
    Assign { agent: String, spec: String },
    Cancel { id: String },
    Status,
    Agents,
    Help,
    Approve { target: ApprovalTarget, id: String },
    Reject { target: ApprovalTarget, id: String },
    Retry { id: String },
    Feedback { text: String },
    Quit,
}

/// Parse one input line. `Err` carries a usage hint for the operator.
pub fn parse(line: &str) -> Result<Command, String> {
    let line = line.trim();
    let (verb, rest) = match line.split_once(char::is_whitespace) {
        Some((verb, rest)) => (verb, rest.trim()),
        None => (line, ""),
    };

    match verb {
        "" => Err("Type 'help' for available commands".to_string()),

        "newfeature" => {
            if rest.is_empty() {
                return Err("Usage: newfeature <name> | <description>".to_string());
            }
            let (name, description) = match rest.split_once('|') {
                Some((name, description)) => (name.trim(), description.trim()),
                None => (rest, rest),
            };
            if name.is_empty() {
                return Err("Feature name cannot be empty".to_string());
            }
            Ok(Command::NewFeature {
                name: name.to_string(),
                description: description.to_string(),
            })
        }

        "features" => Ok(Command::ListFeatures),

        "feature" => {
            if rest.is_empty() {
                return Err("Usage: feature <feature_id>".to_string());
            }
            Ok(Command::FeatureStatus {
                id: rest.to_string(),
            })
        }

        "techstack" => match rest.split_once(char::is_whitespace) {
            Some((id, stack)) if !stack.trim().is_empty() => Ok(Command::SetTechStack {
                id: id.to_string(),
                tech_stack: stack.trim().to_string(),
            }),
            _ => Err("Usage: techstack <feature_id> <tech stack description>".to_string()),
        },

        "answer" => {
            let Some((id, answers_str)) = rest.split_once(char::is_whitespace) else {
                return Err("Usage: answer <feature_id> Q1: answer1, Q2: answer2".to_string());
            };
            let answers: HashMap<String, String> = ANSWER_RE
                .captures_iter(answers_str)
                .map(|cap| (cap[1].to_string(), cap[2].trim().to_string()))
                .collect();
            if answers.is_empty() {
                return Err("No valid answers found. Use format: Q1: answer1, Q2: answer2".to_string());
            }
            Ok(Command::Answer {
                id: id.to_string(),
                answers,
            })
        }

        "assign" => match rest.split_once(char::is_whitespace) {
            Some((agent, spec)) if !spec.trim().is_empty() => Ok(Command::Assign {
                agent: agent.to_string(),
                spec: spec.trim().to_string(),
            }),
            _ => Err("Usage: assign <agent> <spec>".to_string()),
        },

        "cancel" => {
            if rest.is_empty() {
                return Err("Usage: cancel <task_id or feature_id>".to_string());
            }
            Ok(Command::Cancel {
                id: rest.to_string(),
            })
        }

        "status" => Ok(Command::Status),
        "agents" => Ok(Command::Agents),
        "help" => Ok(Command::Help),

        "approve" | "reject" => {
            let Some((what, id)) = rest.split_once(char::is_whitespace) else {
                return Err(format!("Usage: {verb} <spec|plan|tasks|code|task> <id>"));
            };
            let target = match what {
                "spec" => ApprovalTarget::Spec,
                "plan" => ApprovalTarget::Plan,
                "tasks" => ApprovalTarget::Tasks,
                "code" => ApprovalTarget::Code,
                "task" => ApprovalTarget::Task,
                other => return Err(format!("Unknown approval target: {other}")),
            };
            let id = id.trim().to_string();
            if verb == "approve" {
                Ok(Command::Approve { target, id })
            } else {
                Ok(Command::Reject { target, id })
            }
        }

        "retry" => {
            if rest.is_empty() {
                return Err("Usage: retry <task_id>".to_string());
            }
            Ok(Command::Retry {
                id: rest.to_string(),
            })
        }

        "feedback" => {
            if rest.is_empty() {
                return Err("Usage: feedback <free-text guidance>".to_string());
            }
            Ok(Command::Feedback {
                text: rest.to_string(),
            })
        }

        "quit" | "exit" => Ok(Command::Quit),

        other => Err(format!("Unknown command: {other}\nType 'help' for available commands")),
    }
}

/// Operator help text.
pub fn help_text() -> &'static str {
    "conductor commands

Feature workflow:
  newfeature <name> | <description>   Start a new feature
  features                            List all features
  feature <id>                        Show feature status
  techstack <id> <stack>              Set tech stack for planning
  answer <id> Q1: a, Q2: b            Answer clarification questions
  approve <spec|plan|tasks|code> <id> Approve a gated phase
  reject <spec|plan|tasks|code> <id>  Reject a gated phase
  feedback <text>                     Provide requested free-text guidance

Tasks:
  assign <agent> <spec>               Create an ad-hoc task
  approve task <id>                   Merge an approved ad-hoc task
  reject task <id>                    Reject an ad-hoc task
  retry <id>                          Retry a failed or escalated task
  cancel <id>                         Cancel a task or feature

General:
  status                              Show all active work
  agents                              List available agents
  help                                Show this message
  quit                                Exit"
}

/// Execute one command. Returns false when the loop should stop.
pub async fn dispatch(orchestrator: &Orchestrator, command: Command) -> bool {
    let outcome = match command {
        Command::NewFeature { name, description } => orchestrator
            .start_feature(&name, &description)
            .await
            .map(|_| ()),
        Command::ListFeatures => {
            let features = orchestrator.list_features().await;
            if features.is_empty() {
                println!("No active features. Use 'newfeature' to start one.");
            } else {
                for line in features {
                    println!("{line}");
                }
            }
            Ok(())
        }
        Command::FeatureStatus { id } => match orchestrator.feature_status(&id).await {
            Ok(report) => {
                println!("{report}");
                Ok(())
            }
            Err(e) => Err(e),
        },
        Command::SetTechStack { id, tech_stack } => {
            orchestrator.set_tech_stack(&id, &tech_stack).await
        }
        Command::Answer { id, answers } => orchestrator.answer_clarifications(&id, answers).await,
        Command::Assign { agent, spec } => {
            orchestrator.assign_task(&agent, &spec).await.map(|_| ())
        }
        Command::Cancel { id } => orchestrator.cancel(&id).await.map(|_| ()),
        Command::Status => {
            println!("{}", orchestrator.status_report().await);
            Ok(())
        }
        Command::Agents => {
            let names = orchestrator.agent_names();
            if names.is_empty() {
                println!("No agents configured");
            } else {
                for name in names {
                    println!("  - {name}");
                }
            }
            Ok(())
        }
        Command::Help => {
            println!("{}", help_text());
            Ok(())
        }
        Command::Approve { target, id } => match target {
            ApprovalTarget::Spec => orchestrator.approve_spec(&id).await,
            ApprovalTarget::Plan => orchestrator.approve_plan(&id).await,
            ApprovalTarget::Tasks => orchestrator.approve_tasks(&id).await,
            ApprovalTarget::Code => orchestrator.approve_code(&id).await,
            ApprovalTarget::Task => orchestrator.approve_task(&id).await,
        },
        Command::Reject { target, id } => match target {
            ApprovalTarget::Spec => orchestrator.reject_spec(&id).await,
            ApprovalTarget::Plan => orchestrator.reject_plan(&id).await,
            ApprovalTarget::Tasks => orchestrator.reject_tasks(&id).await,
            ApprovalTarget::Code => orchestrator.reject_code(&id).await,
            ApprovalTarget::Task => orchestrator.reject_task(&id).await,
        },
        Command::Retry { id } => orchestrator.retry_task(&id).await,
        Command::Feedback { text } => orchestrator.provide_feedback(&text).await,
        Command::Quit => return false,
    };

    if let Err(e) = outcome {
        println!("{e}");
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_newfeature_with_description() {
        let cmd = parse("newfeature User Auth | Build login and signup").unwrap();
        assert_eq!(
            cmd,
            Command::NewFeature {
                name: "User Auth".into(),
                description: "Build login and signup".into()
            }
        );
    }

    #[test]
    fn test_parse_newfeature_name_only() {
        let cmd = parse("newfeature Payments").unwrap();
        assert_eq!(
            cmd,
            Command::NewFeature {
                name: "Payments".into(),
                description: "Payments".into()
            }
        );
    }

    #[test]
    fn test_parse_newfeature_requires_name() {
        assert!(parse("newfeature").is_err());
        assert!(parse("newfeature   | description only").is_err());
    }

    #[test]
    fn test_parse_answers() {
        let cmd = parse("answer ab12cd34 Q1: postgres, Q2: no SSO").unwrap();
        match cmd {
            Command::Answer { id, answers } => {
                assert_eq!(id, "ab12cd34");
                assert_eq!(answers["Q1"], "postgres");
                assert_eq!(answers["Q2"], "no SSO");
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_parse_answers_requires_valid_format() {
        assert!(parse("answer ab12cd34 just some text").is_err());
        assert!(parse("answer ab12cd34").is_err());
    }

    #[test]
    fn test_parse_approvals() {
        assert_eq!(
            parse("approve spec ab12cd34").unwrap(),
            Command::Approve {
                target: ApprovalTarget::Spec,
                id: "ab12cd34".into()
            }
        );
        assert_eq!(
            parse("reject code ab12cd34").unwrap(),
            Command::Reject {
                target: ApprovalTarget::Code,
                id: "ab12cd34".into()
            }
        );
        assert_eq!(
            parse("approve task deadbeef").unwrap(),
            Command::Approve {
                target: ApprovalTarget::Task,
                id: "deadbeef".into()
            }
        );
    }

    #[test]
    fn test_parse_approve_rejects_unknown_target() {
        assert!(parse("approve everything ab12cd34").is_err());
        assert!(parse("approve spec").is_err());
    }

    #[test]
    fn test_parse_assign() {
        assert_eq!(
            parse("assign claude-code Implement user login").unwrap(),
            Command::Assign {
                agent: "claude-code".into(),
                spec: "Implement user login".into()
            }
        );
        assert!(parse("assign claude-code").is_err());
    }

    #[test]
    fn test_parse_simple_commands() {
        assert_eq!(parse("status").unwrap(), Command::Status);
        assert_eq!(parse("features").unwrap(), Command::ListFeatures);
        assert_eq!(parse("agents").unwrap(), Command::Agents);
        assert_eq!(parse("help").unwrap(), Command::Help);
        assert_eq!(parse("quit").unwrap(), Command::Quit);
        assert_eq!(parse("exit").unwrap(), Command::Quit);
    }

    #[test]
    fn test_parse_feedback_keeps_full_text() {
        assert_eq!(
            parse("feedback split the auth module, and add tests").unwrap(),
            Command::Feedback {
                text: "split the auth module, and add tests".into()
            }
        );
    }

    #[test]
    fn test_parse_unknown_command() {
        let err = parse("launch ab12cd34").unwrap_err();
        assert!(err.contains("Unknown command"));
    }

    #[test]
    fn test_parse_empty_line() {
        assert!(parse("").is_err());
        assert!(parse("   ").is_err());
    }
}
