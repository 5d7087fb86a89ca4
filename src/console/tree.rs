// Hierarchical slash-command tree for the console client
//
// Controllers declare `CommandGroup`s. Building the tree walks them depth
// first: a named group becomes a node under its parent, an unnamed group
// adds its commands straight to the parent.

use futures::future::BoxFuture;
use std::collections::BTreeMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;

use crate::error::CommandError;

/// Declared scalar type of a command parameter
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamKind {
    Str,
    Int,
}

impl ParamKind {
    fn label(self) -> &'static str {
        match self {
            ParamKind::Str => "str",
            ParamKind::Int => "int",
        }
    }

    fn convert(self, token: &str) -> Result<ArgValue, CommandError> {
        match self {
            ParamKind::Str => Ok(ArgValue::Str(token.to_string())),
            ParamKind::Int => token
                .parse()
                .map(ArgValue::Int)
                .map_err(|_| CommandError::ArgumentType {
                    token: token.to_string(),
                    expected: "int",
                }),
        }
    }
}

/// A converted argument
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ArgValue {
    Str(String),
    Int(i64),
}

impl ArgValue {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            ArgValue::Str(s) => Some(s),
            ArgValue::Int(_) => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            ArgValue::Int(n) => Some(*n),
            ArgValue::Str(_) => None,
        }
    }
}

impl fmt::Display for ArgValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ArgValue::Str(s) => write!(f, "{}", s),
            ArgValue::Int(n) => write!(f, "{}", n),
        }
    }
}

/// Positional parameter. A parameter with a default may be omitted; the
/// default is converted like typed input.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Param {
    pub name: &'static str,
    pub kind: ParamKind,
    pub default: Option<&'static str>,
}

impl Param {
    pub const fn str(name: &'static str) -> Self {
        Self {
            name,
            kind: ParamKind::Str,
            default: None,
        }
    }

    pub const fn int(name: &'static str) -> Self {
        Self {
            name,
            kind: ParamKind::Int,
            default: None,
        }
    }

    pub const fn or(self, default: &'static str) -> Self {
        Self {
            default: Some(default),
            ..self
        }
    }

    fn hint(&self) -> String {
        match self.default {
            Some(_) => format!("[{}:{}]", self.name, self.kind.label()),
            None => format!("<{}:{}>", self.name, self.kind.label()),
        }
    }
}

pub type CommandFuture = BoxFuture<'static, anyhow::Result<()>>;
pub type CommandHandler = Arc<dyn Fn(Vec<ArgValue>) -> CommandFuture + Send + Sync>;

/// One invocable command
#[derive(Clone)]
pub struct CommandSpec {
    pub name: &'static str,
    pub description: &'static str,
    pub params: Vec<Param>,
    handler: CommandHandler,
}

impl CommandSpec {
    pub fn new<F, Fut>(
        name: &'static str,
        description: &'static str,
        params: Vec<Param>,
        handler: F,
    ) -> Self
    where
        F: Fn(Vec<ArgValue>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        Self {
            name,
            description,
            params,
            handler: Arc::new(move |args| -> CommandFuture { Box::pin(handler(args)) }),
        }
    }
}

impl fmt::Debug for CommandSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CommandSpec")
            .field("name", &self.name)
            .field("params", &self.params)
            .finish()
    }
}

/// Controller-level declaration of commands and nested groups
#[derive(Debug, Clone, Default)]
pub struct CommandGroup {
    pub name: Option<&'static str>,
    pub commands: Vec<CommandSpec>,
    pub subgroups: Vec<CommandGroup>,
}

impl CommandGroup {
    /// Group whose commands attach directly to the parent
    pub fn unnamed() -> Self {
        Self::default()
    }

    pub fn named(name: &'static str) -> Self {
        Self {
            name: Some(name),
            ..Self::default()
        }
    }

    pub fn command(mut self, spec: CommandSpec) -> Self {
        self.commands.push(spec);
        self
    }

    pub fn group(mut self, group: CommandGroup) -> Self {
        self.subgroups.push(group);
        self
    }
}

/// Node of the built tree. A node without a command is a group.
#[derive(Debug, Default)]
pub struct CommandNode {
    pub name: String,
    command: Option<CommandSpec>,
    children: BTreeMap<String, CommandNode>,
}

impl CommandNode {
    fn group(name: &str) -> Self {
        Self {
            name: name.to_string(),
            ..Self::default()
        }
    }

    pub fn is_group(&self) -> bool {
        self.command.is_none()
    }

    pub fn child(&self, name: &str) -> Option<&CommandNode> {
        self.children.get(&name.to_lowercase())
    }

    pub fn child_names(&self) -> Vec<String> {
        self.children.keys().cloned().collect()
    }

    pub fn command(&self) -> Option<&CommandSpec> {
        self.command.as_ref()
    }

    fn attach(&mut self, group: &CommandGroup) {
        let target = match group.name {
            Some(name) => self
                .children
                .entry(name.to_lowercase())
                .or_insert_with(|| CommandNode::group(name)),
            None => self,
        };

        for spec in &group.commands {
            let key = spec.name.to_lowercase();
            if target.children.contains_key(&key) {
                tracing::warn!("Command '{}' declared twice, keeping the last", spec.name);
            }
            let node = target
                .children
                .entry(key)
                .or_insert_with(|| CommandNode::group(spec.name));
            node.command = Some(spec.clone());
        }

        for subgroup in &group.subgroups {
            target.attach(subgroup);
        }
    }
}

/// Result of dispatching one input line
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Dispatch {
    /// Nothing typed
    Empty,
    /// Input stopped at a group. `unmatched` is the first token that did not
    /// name a child, if any.
    Choices {
        path: Vec<String>,
        options: Vec<String>,
        unmatched: Option<String>,
    },
    /// A command handler ran
    Invoked { path: Vec<String> },
}

pub struct CommandTree {
    root: CommandNode,
}

impl CommandTree {
    pub fn build(groups: &[CommandGroup]) -> Self {
        let mut root = CommandNode::group("");
        for group in groups {
            root.attach(group);
        }
        Self { root }
    }

    pub fn root(&self) -> &CommandNode {
        &self.root
    }

    /// Walk from the root while tokens name children. Returns the node
    /// reached, the matched path and the number of tokens consumed.
    pub fn resolve(&self, tokens: &[&str]) -> (&CommandNode, Vec<String>, usize) {
        let mut node = &self.root;
        let mut path = Vec::new();
        let mut consumed = 0;

        for token in tokens {
            if !node.is_group() {
                break;
            }
            match node.child(token) {
                Some(child) => {
                    path.push(child.name.clone());
                    node = child;
                    consumed += 1;
                }
                None => break,
            }
        }
        (node, path, consumed)
    }

    /// Tokenize a line, resolve it and run the command it names
    pub async fn dispatch(&self, line: &str) -> Result<Dispatch, CommandError> {
        let mut tokens: Vec<&str> = line.split_whitespace().collect();
        if let Some(first) = tokens.first().copied() {
            let stripped = first.strip_prefix('/').unwrap_or(first);
            if stripped.is_empty() {
                tokens.remove(0);
            } else {
                tokens[0] = stripped;
            }
        }
        if tokens.is_empty() {
            return Ok(Dispatch::Empty);
        }

        let (node, path, consumed) = self.resolve(&tokens);
        let Some(spec) = node.command() else {
            return Ok(Dispatch::Choices {
                path,
                options: node.child_names(),
                unmatched: tokens.get(consumed).map(|t| t.to_string()),
            });
        };

        let args = convert_args(spec, &path, &tokens[consumed..])?;
        (spec.handler)(args).await?;
        Ok(Dispatch::Invoked { path })
    }

    /// Usage line and description of every command, depth first
    pub fn help_lines(&self) -> Vec<String> {
        let mut lines = Vec::new();
        collect_help(&self.root, &mut Vec::new(), &mut lines);
        lines
    }
}

fn usage(path: &[String], params: &[Param]) -> String {
    let mut usage = format!("/{}", path.join(" "));
    for param in params {
        usage.push(' ');
        usage.push_str(&param.hint());
    }
    usage
}

fn collect_help(node: &CommandNode, path: &mut Vec<String>, lines: &mut Vec<String>) {
    for child in node.children.values() {
        path.push(child.name.clone());
        if let Some(spec) = child.command() {
            lines.push(format!("{}  {}", usage(path, &spec.params), spec.description));
        }
        collect_help(child, path, lines);
        path.pop();
    }
}

fn convert_args(
    spec: &CommandSpec,
    path: &[String],
    raw: &[&str],
) -> Result<Vec<ArgValue>, CommandError> {
    let params = &spec.params;
    let required = params.iter().filter(|p| p.default.is_none()).count();

    // Free-text tail: extra tokens fold into a trailing string parameter
    let mut tokens: Vec<String> = raw.iter().map(|t| t.to_string()).collect();
    if let Some(last) = params.last() {
        if last.kind == ParamKind::Str && tokens.len() > params.len() {
            let tail = tokens.split_off(params.len() - 1).join(" ");
            tokens.push(tail);
        }
    }

    if tokens.len() < required || tokens.len() > params.len() {
        return Err(CommandError::ArgumentCount {
            usage: usage(path, params),
        });
    }

    params
        .iter()
        .enumerate()
        .map(|(i, param)| match tokens.get(i) {
            Some(token) => param.kind.convert(token),
            None => param
                .default
                .map(|default| param.kind.convert(default))
                .unwrap_or_else(|| {
                    Err(CommandError::ArgumentCount {
                        usage: usage(path, params),
                    })
                }),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    type Calls = Arc<Mutex<Vec<(String, Vec<ArgValue>)>>>;

    fn recorder(
        calls: &Calls,
        name: &'static str,
    ) -> impl Fn(Vec<ArgValue>) -> futures::future::Ready<anyhow::Result<()>> {
        let calls = calls.clone();
        move |args| {
            calls.lock().unwrap().push((name.to_string(), args));
            futures::future::ready(Ok(()))
        }
    }

    fn tree(calls: &Calls) -> CommandTree {
        let admin = CommandGroup::named("admin").command(CommandSpec::new(
            "kick",
            "Kick a user",
            vec![Param::int("user_id"), Param::str("reason").or("none")],
            recorder(calls, "kick"),
        ));
        CommandTree::build(&[
            CommandGroup::unnamed()
                .command(CommandSpec::new(
                    "say",
                    "Say something",
                    vec![Param::int("to"), Param::str("text")],
                    recorder(calls, "say"),
                ))
                .group(admin),
        ])
    }

    #[tokio::test]
    async fn test_named_group_nests_under_parent() {
        let calls = Calls::default();
        let tree = tree(&calls);

        assert_eq!(tree.root().child_names(), vec!["admin", "say"]);
        assert!(tree.root().child("admin").unwrap().is_group());

        let result = tree.dispatch("/admin").await.unwrap();
        assert_eq!(
            result,
            Dispatch::Choices {
                path: vec!["admin".to_string()],
                options: vec!["kick".to_string()],
                unmatched: None,
            }
        );
        assert!(calls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_case_insensitive_path_and_defaults() {
        let calls = Calls::default();
        let tree = tree(&calls);

        tree.dispatch("/ADMIN Kick 7").await.unwrap();
        tree.dispatch("/admin kick 8 Spamming").await.unwrap();

        let calls = calls.lock().unwrap();
        assert_eq!(
            calls[0].1,
            vec![ArgValue::Int(7), ArgValue::Str("none".to_string())]
        );
        assert_eq!(
            calls[1].1,
            vec![ArgValue::Int(8), ArgValue::Str("Spamming".to_string())]
        );
    }

    #[tokio::test]
    async fn test_tail_tokens_rejoin() {
        let calls = Calls::default();
        let tree = tree(&calls);

        tree.dispatch("/say 3 hello   there world").await.unwrap();

        let calls = calls.lock().unwrap();
        assert_eq!(
            calls[0].1,
            vec![ArgValue::Int(3), ArgValue::Str("hello there world".to_string())]
        );
    }

    #[tokio::test]
    async fn test_usage_hint() {
        let calls = Calls::default();
        let tree = tree(&calls);

        let err = tree.dispatch("/admin kick").await.unwrap_err();
        assert_eq!(
            err.to_string(),
            "Wrong number of arguments. Usage: /admin kick <user_id:int> [reason:str]"
        );
    }

    #[tokio::test]
    async fn test_empty_and_help() {
        let calls = Calls::default();
        let tree = tree(&calls);

        assert_eq!(tree.dispatch("   ").await.unwrap(), Dispatch::Empty);
        assert_eq!(tree.dispatch("/").await.unwrap(), Dispatch::Empty);

        let help = tree.help_lines();
        assert_eq!(help.len(), 2);
        assert!(help[0].starts_with("/admin kick <user_id:int> [reason:str]"));
        assert!(help[1].starts_with("/say <to:int> <text:str>"));
    }

    #[tokio::test]
    async fn test_handler_error_surfaces() {
        let tree = CommandTree::build(&[CommandGroup::unnamed().command(CommandSpec::new(
            "fail",
            "Always fails",
            vec![],
            |_| async { Err::<(), _>(anyhow::anyhow!("nope")) },
        ))]);

        let err = tree.dispatch("/fail").await.unwrap_err();
        assert!(matches!(err, CommandError::Handler(_)));
        assert_eq!(err.to_string(), "Command failed: nope");
    }
}
