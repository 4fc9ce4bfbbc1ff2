#[derive(Clone, Copy, Debug)]
pub(crate) struct CommandSpec {
    pub command: &'static str,
    pub action: &'static str,
}

pub(crate) const PATH_ARG_COMMANDS: &[CommandSpec] = &[
    CommandSpec {
        command: "upload",
        action: "upload",
    },
    CommandSpec {
        command: "download",
        action: "download",
    },
];

pub(crate) const TEXT_ARG_COMMANDS: &[CommandSpec] = &[
    CommandSpec {
        command: "fill",
        action: "fill_empty_space",
    },
    CommandSpec {
        command: "prompt",
        action: "expand_prompt",
    },
];

pub(crate) const NO_ARG_COMMANDS: &[CommandSpec] = &[
    CommandSpec {
        command: "resize",
        action: "resize",
    },
    CommandSpec {
        command: "regenerate",
        action: "regenerate",
    },
    CommandSpec {
        command: "regen",
        action: "regenerate",
    },
    CommandSpec {
        command: "prev",
        action: "view_previous",
    },
    CommandSpec {
        command: "next",
        action: "view_next",
    },
    CommandSpec {
        command: "history",
        action: "show_history",
    },
    CommandSpec {
        command: "help",
        action: "help",
    },
    CommandSpec {
        command: "quit",
        action: "quit",
    },
    CommandSpec {
        command: "exit",
        action: "quit",
    },
];

pub(crate) const SIZE_COMMAND: CommandSpec = CommandSpec {
    command: "size",
    action: "set_dimensions",
};

pub const CHAT_HELP_COMMANDS: &[&str] = &[
    "/upload <path>",
    "/size <WxH>|clear",
    "/resize",
    "/regenerate",
    "/fill <prompt>",
    "/prompt <text>",
    "/prev",
    "/next",
    "/history",
    "/download [dir]",
    "/help",
    "/quit",
];
