use clap::{Parser, Subcommand};

use crate::models::user::Role;
use crate::models::validation_request::{ActionType, RequestStatus};

/// Tontine: two-person approval for sensitive back-office actions
#[derive(Parser)]
#[command(name = "tontine", version, about)]
pub struct Cli {
    /// Authority base URL (client commands)
    #[arg(long, global = true, env = "TONTINE_API_URL")]
    pub api_url: Option<String>,

    /// Bearer token (client commands)
    #[arg(long, global = true, env = "TONTINE_API_TOKEN", hide_env_values = true)]
    pub token: Option<String>,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Start the validation authority
    Serve {
        /// Port to bind
        #[arg(short, long)]
        port: Option<u16>,
    },

    /// Create, list and decide validation requests
    Request {
        #[command(subcommand)]
        command: RequestCommands,
    },

    /// List users who may approve your requests
    Approvers,

    /// Work through validation requests from the notification feed
    Notification {
        #[command(subcommand)]
        command: NotificationCommands,
    },

    /// Manage users (needs direct store access)
    User {
        #[command(subcommand)]
        command: UserCommands,
    },
}

#[derive(Subcommand)]
pub enum RequestCommands {
    /// Ask a treasurer to approve a sensitive action
    Create {
        /// e.g. DELETE_USER, block-tontine
        #[arg(long)]
        action: ActionType,
        #[arg(long)]
        resource_id: String,
        #[arg(long)]
        resource_name: String,
        #[arg(long)]
        reason: String,
        /// Id of the treasurer who must decide
        #[arg(long)]
        approver: String,
    },
    /// Requests waiting for your decision, oldest first
    Pending,
    /// Requests you initiated
    Mine {
        #[arg(long)]
        status: Option<RequestStatus>,
    },
    /// Show one request
    Show {
        id: String,
    },
    /// Approve a request assigned to you
    Accept {
        id: String,
    },
    /// Reject a request assigned to you
    Reject {
        id: String,
        /// At least 10 characters
        #[arg(long)]
        reason: String,
    },
    /// Wait until a request is decided
    Watch {
        id: String,
        /// Seconds between polls
        #[arg(long, default_value = "5")]
        interval: u64,
        /// Give up after this many seconds
        #[arg(long, default_value = "300")]
        timeout: u64,
    },
    /// Run the action an accepted request authorizes
    Execute {
        id: String,
        /// Base URL of the user/tontine management API (defaults to --api-url)
        #[arg(long)]
        target_url: Option<String>,
    },
}

#[derive(Subcommand)]
pub enum NotificationCommands {
    /// Unread validation-request notifications
    List,
    /// Approve the request behind a notification
    Accept {
        id: String,
    },
    /// Reject the request behind a notification
    Reject {
        id: String,
        #[arg(long)]
        reason: String,
    },
}

#[derive(Subcommand)]
pub enum UserCommands {
    /// Create or update a user and print a fresh bearer token
    Add {
        #[arg(long)]
        id: String,
        #[arg(long)]
        name: String,
        #[arg(long)]
        role: Role,
    },
}
