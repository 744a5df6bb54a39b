use minijinja::Environment;
use serde::Serialize;
use tracing::error;

pub fn init_templates() -> Environment<'static> {
    let mut env = Environment::new();

    if let Err(e) = env.add_template("index.html", include_str!("../../templates/index.html")) {
        error!("Failed to add index template: {}", e);
    }

    env.add_filter("json", |value: minijinja::value::Value| {
        serde_json::to_string(&value).unwrap_or_else(|_| "null".to_string())
    });

    env
}

/// Renders a template, turning failures into an HTML error page.
pub fn render_template<S: Serialize>(env: &Environment, template_name: &str, context: S) -> String {
    match env.get_template(template_name) {
        Ok(tmpl) => match tmpl.render(context) {
            Ok(result) => result,
            Err(e) => {
                error!("Template render error: {}", e);
                format!("<h1>Template Error</h1><p>{}</p>", e)
            }
        },
        Err(e) => {
            error!("Template not found: {} ({})", template_name, e);
            format!("<h1>Template Not Found</h1><p>{}: {}</p>", template_name, e)
        }
    }
}
