//! Comment formatters handed to a [`Reporter`](crate::io::reporter::Reporter).

/// Wrap content as a collapsible block with an HTML summary line.
pub fn collapsible(summary: &str) -> impl Fn(&str) -> String + '_ {
    move |content: &str| format!("<details><summary>{summary}</summary>\n\n{content}\n</details>")
}

/// Like [`collapsible`], with the content fenced as terraform output.
pub fn terraform_output_collapsible(summary: &str) -> impl Fn(&str) -> String + '_ {
    move |content: &str| {
        format!(
            "<details><summary>{summary}</summary>\n\n```terraform\n{content}\n```\n</details>"
        )
    }
}
