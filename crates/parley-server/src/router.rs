//! The message-routing engine.
//!
//! One inbound envelope in, zero or more formatted broadcast lines out.
//! Delivery is best-effort and at-most-once: every fan-out iterates an owned
//! registry snapshot, per-recipient failures are logged and skipped, and no
//! failure ever aborts the triggering request or the engine itself.

use chrono::Utc;
use tracing::{debug, info, warn};

use parley_shared::wire::format_line;
use parley_shared::{Area, Envelope, Operation, Profile, SYSTEM_SENDER};

use crate::groups::GroupRegistry;
use crate::registry::{Connection, ConnectionRegistry};
use crate::transport::Transport;

#[derive(Default)]
pub struct Router {
    connections: ConnectionRegistry,
    groups: GroupRegistry,
}

impl Router {
    pub fn new() -> Self {
        Self::default()
    }

    /// Handle one inbound envelope from the connection owning `transport`.
    ///
    /// The arrival timestamp is stamped here; the sender's clock is not
    /// trusted.
    pub async fn dispatch(&self, mut env: Envelope, transport: &Transport) {
        env.timestamp = Utc::now().timestamp();

        match env.op {
            Operation::Chat => self.public_chat(&env).await,
            Operation::Login => self.login(&env, transport).await,
            Operation::Logout => self.disconnect(&env.sender).await,
            Operation::UpdateUser => self.update_user(&env).await,
            Operation::PrivateChat => self.private_chat(&env).await,
            Operation::GroupChat => self.group_chat(&env).await,
            Operation::CreateGroup => self.create_group(&env).await,
            Operation::ListGroups => self.list_groups(&env).await,
            Operation::ListUsers => self.list_users(&env).await,
        }
    }

    /// Remove a user and tell everyone else, for an explicit Logout.
    pub async fn disconnect(&self, name: &str) {
        // Dropping the registry entry releases its transport clone; once the
        // connection task returns as well, the writer drains and the socket
        // closes.
        self.connections.remove(name).await;
        self.notify_left(name).await;
    }

    /// Teardown for a connection that ended without a Logout. The removal is
    /// conditional on the connection still owning its registry entry: a name
    /// that logged in again on a newer connection stays online, silently.
    pub async fn connection_lost(&self, name: &str, transport: &Transport) {
        if self.connections.remove_if_owner(name, transport).await {
            self.notify_left(name).await;
        } else {
            debug!(user = %name, "Stale connection closed, name already re-registered");
        }
    }

    async fn notify_left(&self, name: &str) {
        info!(user = %name, "User left");
        let line = format_line(
            Area::Public,
            Utc::now().timestamp(),
            SYSTEM_SENDER,
            &format!("{name} left the chat"),
        );
        self.broadcast_except(&line, name).await;
    }

    async fn public_chat(&self, env: &Envelope) {
        info!(sender = %env.sender, "Public chat message");
        let line = format_line(env.area, env.timestamp, &env.sender, &env.body);
        for conn in self.connections.snapshot().await {
            deliver(&conn, &line);
        }
    }

    async fn login(&self, env: &Envelope, transport: &Transport) {
        info!(user = %env.sender, "User logged in");
        self.connections
            .upsert(env.sender.clone(), transport.clone())
            .await;

        let line = format_line(
            Area::Public,
            env.timestamp,
            SYSTEM_SENDER,
            &format!("{} joined the chat", env.sender),
        );
        self.broadcast_except(&line, &env.sender).await;
    }

    async fn update_user(&self, env: &Envelope) {
        // A payload that fails to decode is dropped without a reply and the
        // prior profile stays in place.
        let profile: Profile = match serde_json::from_str(&env.body) {
            Ok(profile) => profile,
            Err(e) => {
                debug!(user = %env.sender, error = %e, "Ignoring undecodable profile payload");
                return;
            }
        };

        if !self
            .connections
            .update_profile(&env.sender, profile.clone())
            .await
        {
            debug!(user = %env.sender, "Profile update for unregistered user dropped");
            return;
        }

        info!(user = %env.sender, "Profile updated");
        let echo = serde_json::to_string(&profile).unwrap_or_default();
        self.reply(
            &env.sender,
            Area::Public,
            env.timestamp,
            &format!("profile updated: {echo}"),
        )
        .await;
    }

    async fn private_chat(&self, env: &Envelope) {
        let Some(sender) = self.connections.lookup(&env.sender).await else {
            debug!(sender = %env.sender, "Private message from unregistered sender dropped");
            return;
        };

        let Some(target) = self.connections.lookup(&env.target).await else {
            self.reply(
                &env.sender,
                Area::Private,
                env.timestamp,
                &format!("user {} is not online", env.target),
            )
            .await;
            return;
        };

        info!(sender = %env.sender, target = %env.target, "Private message");
        // The sender gets an identical copy as delivery confirmation.
        let line = format_line(Area::Private, env.timestamp, &env.sender, &env.body);
        deliver(&target, &line);
        deliver(&sender, &line);
    }

    async fn group_chat(&self, env: &Envelope) {
        let Some(members) = self.groups.members(&env.group).await else {
            self.reply(
                &env.sender,
                Area::Group,
                env.timestamp,
                &format!("group {} does not exist", env.group),
            )
            .await;
            return;
        };

        info!(sender = %env.sender, group = %env.group, "Group message");
        let line = format_line(Area::Group, env.timestamp, &env.sender, &env.body);
        for member in members {
            match self.connections.lookup(&member).await {
                Some(conn) => deliver(&conn, &line),
                // Members that disconnected without leaving the group are
                // skipped, not errored.
                None => debug!(member = %member, group = %env.group, "Skipping offline member"),
            }
        }
    }

    async fn create_group(&self, env: &Envelope) {
        // The group name travels in the body.
        let reply = match self.groups.create(env.body.clone(), env.sender.clone()).await {
            Ok(()) => {
                info!(group = %env.body, creator = %env.sender, "Group created");
                format!("group {} created, you are its first member", env.body)
            }
            Err(e) => e.to_string(),
        };
        self.reply(&env.sender, Area::Public, env.timestamp, &reply).await;
    }

    async fn list_groups(&self, env: &Envelope) {
        let names = self.groups.names().await;
        if names.is_empty() {
            self.reply(&env.sender, Area::Public, env.timestamp, "no groups").await;
            return;
        }
        // One reply line per name: recipients split on newlines, so a joined
        // list would arrive as one formatted line plus bare fragments.
        for name in names {
            self.reply(&env.sender, Area::Public, env.timestamp, &name).await;
        }
    }

    async fn list_users(&self, env: &Envelope) {
        let names = self.connections.names().await;
        if names.is_empty() {
            self.reply(&env.sender, Area::Public, env.timestamp, "no users").await;
            return;
        }
        for name in names {
            self.reply(&env.sender, Area::Public, env.timestamp, &name).await;
        }
    }

    /// One formatted line to everyone except `skip`.
    async fn broadcast_except(&self, line: &str, skip: &str) {
        for conn in self.connections.snapshot().await {
            if conn.name != skip {
                deliver(&conn, line);
            }
        }
    }

    /// System line to the requester only. Requesters that never logged in
    /// have no transport and the reply is dropped.
    async fn reply(&self, name: &str, area: Area, timestamp: i64, content: &str) {
        let Some(conn) = self.connections.lookup(name).await else {
            debug!(user = %name, "Reply to unregistered user dropped");
            return;
        };
        let line = format_line(area, timestamp, SYSTEM_SENDER, content);
        deliver(&conn, &line);
    }
}

fn deliver(conn: &Connection, line: &str) {
    if let Err(e) = conn.transport.send_line(line) {
        warn!(recipient = %conn.name, error = %e, "Delivery failed, skipping recipient");
    }
}
