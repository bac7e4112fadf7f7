//! Account administration.
//!
//! Every mutation syncs the servers before the command returns.

use crate::context::Context;
use std::time::Duration;
use wlsync_engine::{UserInfo, WhitelistService};

/// How an identity is looked up by `info`.
#[derive(Debug, Clone)]
pub enum Lookup {
    /// By identity id.
    User(String),
    /// By linked account UUID.
    Uuid(String),
    /// By Minecraft name.
    Name(String),
}

fn service(ctx: &Context) -> WhitelistService {
    ctx.service(Duration::ZERO)
}

async fn finish(service: &WhitelistService) {
    service.scheduler().settle().await;
    service.scheduler().shutdown();
}

/// Links the account named `name` to `user`.
pub async fn link(ctx: &Context, user: &str, name: &str) -> Result<(), Box<dyn std::error::Error>> {
    let service = service(ctx);
    let profile = service.add_account(user, name).await?;
    finish(&service).await;
    println!("✓ Linked {} ({}) to {user}", profile.name, profile.uuid);
    Ok(())
}

/// Unlinks one account, or every account when `uuid` is `None`.
pub async fn unlink(
    ctx: &Context,
    user: &str,
    uuid: Option<&str>,
) -> Result<(), Box<dyn std::error::Error>> {
    let service = service(ctx);
    let record = match uuid {
        Some(uuid) => service.remove_account(user, uuid).await?,
        None => service.remove_all(user).await?,
    };
    finish(&service).await;
    println!("✓ Unlinked, {user} has {} account(s) left", record.uuids.len());
    Ok(())
}

/// Bans or unbans `user`.
pub async fn set_banned(
    ctx: &Context,
    user: &str,
    banned: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    let service = service(ctx);
    service.set_banned(user, banned).await?;
    finish(&service).await;
    println!("✓ {user} {}", if banned { "banned" } else { "unbanned" });
    Ok(())
}

/// Prints everything known about one identity.
pub async fn info(ctx: &Context, lookup: Lookup, json: bool) -> Result<(), Box<dyn std::error::Error>> {
    let service = service(ctx);
    let info = match &lookup {
        Lookup::User(id) => service.info_by_user(id).await?,
        Lookup::Uuid(uuid) => service.info_by_uuid(uuid).await?,
        Lookup::Name(name) => service.info_by_name(name).await?,
    };
    service.scheduler().shutdown();

    if json {
        println!("{}", serde_json::to_string_pretty(&info)?);
    } else {
        print!("{}", render(&info));
    }
    Ok(())
}

fn render(info: &UserInfo) -> String {
    let mut out = format!("User {}\n", info.id);
    if !info.member {
        out.push_str("  (not a guild member)\n");
    }
    if info.banned {
        out.push_str("  BANNED\n");
    }
    let cap = match info.allowed_links {
        Some(cap) => cap.to_string(),
        None => "unlimited".to_string(),
    };
    out.push_str(&format!("  Links:   {} of {cap}\n", info.profiles.len()));
    for profile in &info.profiles {
        out.push_str(&format!("    {} ({})\n", profile.name, profile.uuid));
    }
    if info.servers.is_empty() {
        out.push_str("  Servers: none\n");
    } else {
        let servers: Vec<&str> = info.servers.iter().map(String::as_str).collect();
        out.push_str(&format!("  Servers: {}\n", servers.join(", ")));
    }
    out
}
