use std::borrow::Cow;

const SPECIAL: &[char] = &[
    ' ', '\t', '\n', '!', '"', '#', '$', '&', '\'', '(', ')', '*', ',', ';', '<', '=', '>', '?',
    '[', '\\', ']', '^', '`', '{', '|', '}', '~',
];

/// Quotes `arg` so that it can be pasted back into a POSIX shell.
pub fn quote(arg: &str) -> Cow<'_, str> {
    if !arg.contains(SPECIAL) {
        return Cow::Borrowed(arg);
    }

    let mut quoted = String::with_capacity(arg.len() + 2);
    quoted.push('\'');
    for c in arg.chars() {
        if c == '\'' {
            quoted.push_str("'\\''");
        } else {
            quoted.push(c);
        }
    }
    quoted.push('\'');
    Cow::Owned(quoted)
}

/// Renders a command line for diagnostics.
pub fn join<S: AsRef<str>>(args: &[S]) -> String {
    args.iter()
        .map(|a| quote(a.as_ref()))
        .collect::<Vec<_>>()
        .join(" ")
}
