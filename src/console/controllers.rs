// Client command controllers

use anyhow::{anyhow, Result};
use sha2::{Digest, Sha256};
use std::future::Future;
use std::sync::Arc;

use crate::console::render::ConsoleLine;
use crate::console::runtime::ClientContext;
use crate::console::tree::{ArgValue, CommandGroup, CommandSpec, CommandTree, Param};
use crate::msgserver::message::{
    HistoryRequest, LoginRequest, RegisterRequest, Request, SendMessageRequest, UserListRequest,
    DEFAULT_PAGE_SIZE,
};

/// Password as sent on the wire: SHA-256 hex, never the plain text
pub fn hash_password(password: &str) -> String {
    hex::encode(Sha256::digest(password.as_bytes()))
}

fn str_arg(args: &[ArgValue], index: usize) -> Result<String> {
    args.get(index)
        .and_then(ArgValue::as_str)
        .map(str::to_string)
        .ok_or_else(|| anyhow!("missing text argument {}", index + 1))
}

fn int_arg(args: &[ArgValue], index: usize) -> Result<i64> {
    args.get(index)
        .and_then(ArgValue::as_int)
        .ok_or_else(|| anyhow!("missing number argument {}", index + 1))
}

/// Wrap a context method as a command handler
fn bind<F, Fut>(ctx: &Arc<ClientContext>, f: F) -> impl Fn(Vec<ArgValue>) -> Fut + Send + Sync + 'static
where
    F: Fn(Arc<ClientContext>, Vec<ArgValue>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<()>> + Send + 'static,
{
    let ctx = ctx.clone();
    move |args| f(ctx.clone(), args)
}

pub fn auth_controller(ctx: &Arc<ClientContext>) -> CommandGroup {
    CommandGroup::unnamed()
        .command(CommandSpec::new(
            "login",
            "Log in with an existing account",
            vec![Param::str("login"), Param::str("password")],
            bind(ctx, |ctx, args| async move {
                ctx.request(Request::Login(LoginRequest {
                    login: str_arg(&args, 0)?,
                    password_hash: hash_password(&str_arg(&args, 1)?),
                }))
                .await
            }),
        ))
        .command(CommandSpec::new(
            "register",
            "Create an account and log in",
            vec![
                Param::str("login"),
                Param::str("username"),
                Param::str("password"),
            ],
            bind(ctx, |ctx, args| async move {
                ctx.request(Request::Register(RegisterRequest {
                    login: str_arg(&args, 0)?,
                    username: str_arg(&args, 1)?,
                    password_hash: hash_password(&str_arg(&args, 2)?),
                }))
                .await
            }),
        ))
}

pub fn chat_controller(ctx: &Arc<ClientContext>) -> CommandGroup {
    CommandGroup::unnamed()
        .command(CommandSpec::new(
            "msg",
            "Send a direct message",
            vec![Param::int("user_id"), Param::str("content")],
            bind(ctx, |ctx, args| async move {
                ctx.request(Request::Message(SendMessageRequest {
                    receiver_id: int_arg(&args, 0)?,
                    content: str_arg(&args, 1)?,
                }))
                .await
            }),
        ))
        .command(CommandSpec::new(
            "history",
            "Show recent messages with a user",
            vec![Param::int("user_id"), Param::int("limit").or("50")],
            bind(ctx, |ctx, args| async move {
                ctx.request(Request::History(HistoryRequest {
                    target_user_id: int_arg(&args, 0)?,
                    limit: int_arg(&args, 1)?,
                }))
                .await
            }),
        ))
}

pub fn users_controller(ctx: &Arc<ClientContext>) -> CommandGroup {
    CommandGroup::unnamed()
        .command(CommandSpec::new(
            "users",
            "List registered users",
            vec![Param::int("page").or("1")],
            bind(ctx, |ctx, args| async move {
                ctx.request(Request::UserList(UserListRequest {
                    page: int_arg(&args, 0)?,
                    page_size: DEFAULT_PAGE_SIZE,
                    search_query: None,
                }))
                .await
            }),
        ))
        .command(CommandSpec::new(
            "find",
            "Search users by login or name",
            vec![Param::str("query")],
            bind(ctx, |ctx, args| async move {
                ctx.request(Request::UserList(UserListRequest {
                    page: 1,
                    page_size: DEFAULT_PAGE_SIZE,
                    search_query: Some(str_arg(&args, 0)?),
                }))
                .await
            }),
        ))
}

pub fn session_controller(ctx: &Arc<ClientContext>) -> CommandGroup {
    CommandGroup::unnamed()
        .command(CommandSpec::new(
            "token",
            "Show the current session token",
            vec![],
            bind(ctx, |ctx, _| async move {
                match ctx.sender().token().await {
                    Some(token) => ctx.console().show(ConsoleLine::info(token)),
                    None => ctx.console().show(ConsoleLine::error(
                        "Token not set - log in or register first",
                    )),
                }
                Ok::<_, anyhow::Error>(())
            }),
        ))
        .command(CommandSpec::new(
            "help",
            "List commands",
            vec![],
            bind(ctx, |ctx, _| async move {
                ctx.console()
                    .show_all(ctx.help_lines().iter().cloned().map(ConsoleLine::info));
                Ok::<_, anyhow::Error>(())
            }),
        ))
        .command(CommandSpec::new(
            "quit",
            "Disconnect and exit",
            vec![],
            bind(ctx, |ctx, _| async move {
                ctx.shutdown_token().cancel();
                Ok::<_, anyhow::Error>(())
            }),
        ))
}

/// The full client command tree, with help text filled in
pub fn build_tree(ctx: &Arc<ClientContext>) -> CommandTree {
    let tree = CommandTree::build(&[
        auth_controller(ctx),
        chat_controller(ctx),
        users_controller(ctx),
        session_controller(ctx),
    ]);
    ctx.set_help(tree.help_lines());
    tree
}
