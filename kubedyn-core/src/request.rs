//! Rendering operations into http requests.
//!
//! This is the bridge between an [`Operation`] value and the wire: the
//! resolved [`ResourceDefinition`] dictates scoping and allowed verbs, the
//! operation contributes path parameters, query options and the body.
use std::str::FromStr;

use crate::{
    error::Error,
    gvk::GroupVersion,
    operation::{Operation, Verb},
    params::ConnectParams,
    resource::ResourceDefinition,
};

pub(crate) const JSON_MIME: &str = "application/json";

/// Render the url path for an operation against its resolved resource
///
/// Fails with [`Error::UnsupportedVerb`] when the resource does not advertise
/// the verb, and with [`Error::MissingPathParams`] naming every absent
/// required parameter.
pub fn url_path(op: &Operation, resource: &ResourceDefinition) -> Result<String, Error> {
    if !resource.supports(op.verb.required_capability()) {
        return Err(Error::UnsupportedVerb {
            verb: op.verb.as_str(),
            name: resource.name.clone(),
        });
    }

    let gv = GroupVersion::from_str(&op.api_version)?;
    let (plural, subresource) = resource.split_name();

    let mut missing: Vec<String> = Vec::new();

    let namespaced_here = resource.namespaced
        && !matches!(op.verb, Verb::ListAllNamespaces | Verb::WatchAllNamespaces);
    let namespace_segment = if namespaced_here {
        match &op.namespace {
            Some(ns) => format!("/namespaces/{ns}"),
            None => {
                missing.push("namespace".into());
                String::new()
            }
        }
    } else {
        String::new()
    };

    // get/delete/patch/update/connect address one object; watch may address
    // either the collection or a single object.
    let name_required = matches!(
        op.verb,
        Verb::Get | Verb::Delete | Verb::Patch | Verb::Update | Verb::Connect
    );
    let name_allowed = name_required || op.verb == Verb::Watch;
    let name_segment = match (&op.name, name_required) {
        (Some(n), _) if name_allowed => format!("/{n}"),
        (None, true) => {
            missing.push("name".into());
            String::new()
        }
        _ => String::new(),
    };

    if !missing.is_empty() {
        return Err(Error::MissingPathParams(missing));
    }

    let mut path = format!("{}{}/{}{}", gv.url_prefix(), namespace_segment, plural, name_segment);
    if let Some(sub) = subresource {
        if !name_segment.is_empty() {
            path.push('/');
            path.push_str(sub);
        }
    }
    Ok(path)
}

/// Render the full http request for an operation against its resolved resource
pub fn build(op: &Operation, resource: &ResourceDefinition) -> Result<http::Request<Vec<u8>>, Error> {
    let target = format!("{}?", url_path(op, resource)?);
    let mut qp = form_urlencoded::Serializer::new(target);

    match op.verb {
        Verb::List | Verb::ListAllNamespaces => {
            op.list_params.validate()?;
            populate_selectors(op, &mut qp);
            op.list_params.populate_qp(&mut qp);
        }
        Verb::Watch | Verb::WatchAllNamespaces => {
            op.watch_params.validate()?;
            qp.append_pair("watch", "true");
            if let Some(to) = &op.watch_params.timeout {
                qp.append_pair("timeoutSeconds", &to.to_string());
            }
            populate_selectors(op, &mut qp);
            if op.watch_params.bookmarks {
                qp.append_pair("allowWatchBookmarks", "true");
            }
        }
        Verb::Create | Verb::Update => {
            op.post_params.validate()?;
            op.post_params.populate_qp(&mut qp);
        }
        Verb::Patch => {
            let patch = op
                .patch
                .as_ref()
                .ok_or_else(|| Error::Validation("patch operation requires a patch body".into()))?;
            op.patch_params.validate(patch)?;
            op.patch_params.populate_qp(patch, &mut qp);
        }
        Verb::DeleteCollection => {
            op.list_params.validate()?;
            populate_selectors(op, &mut qp);
            op.list_params.populate_qp(&mut qp);
        }
        Verb::Connect => populate_connect(op, resource, &mut qp)?,
        Verb::Get | Verb::Delete => {}
    }

    for (k, v) in &op.query {
        qp.append_pair(k, v);
    }
    let urlstr = qp.finish();

    let body: Vec<u8> = match op.verb {
        Verb::Create | Verb::Update => match &op.data {
            Some(data) => serde_json::to_vec(data).map_err(Error::SerializeBody)?,
            None => vec![],
        },
        Verb::Patch => {
            // presence validated above
            match &op.patch {
                Some(patch) => patch.serialize().map_err(Error::SerializeBody)?,
                None => vec![],
            }
        }
        Verb::Delete | Verb::DeleteCollection => {
            if op.delete_params.is_default() {
                vec![] // default serialize needs to be empty body
            } else {
                serde_json::to_vec(&op.delete_params).map_err(Error::SerializeBody)?
            }
        }
        _ => vec![],
    };

    let mut builder = http::Request::builder().method(op.verb.method()).uri(urlstr);
    builder = match op.verb {
        Verb::Create | Verb::Update | Verb::Delete | Verb::DeleteCollection => {
            builder.header(http::header::CONTENT_TYPE, JSON_MIME)
        }
        Verb::Patch => match &op.patch {
            Some(patch) => builder
                .header(http::header::ACCEPT, JSON_MIME)
                .header(http::header::CONTENT_TYPE, patch.content_type()),
            None => builder,
        },
        _ => builder,
    };
    for (k, v) in &op.headers {
        builder = builder.header(k.as_str(), v.as_str());
    }
    builder.body(body).map_err(Error::BuildRequest)
}

fn populate_selectors(op: &Operation, qp: &mut form_urlencoded::Serializer<String>) {
    if let Some(fields) = &op.fields {
        if !fields.selects_all() {
            qp.append_pair("fieldSelector", &fields.to_string());
        }
    }
    if let Some(labels) = &op.labels {
        if !labels.selects_all() {
            qp.append_pair("labelSelector", &labels.to_string());
        }
    }
}

// Exec and attach default their stream flags server-style, log only renders
// its allowlist; any other connectable subresource takes explicit params.
fn populate_connect(
    op: &Operation,
    resource: &ResourceDefinition,
    qp: &mut form_urlencoded::Serializer<String>,
) -> Result<(), Error> {
    let (_, sub) = resource.split_name();
    match (&op.connect_params, sub) {
        (Some(ConnectParams::Exec(p)), _) => p.populate_qp(qp),
        (Some(ConnectParams::Log(p)), _) => p.populate_qp(qp),
        (None, Some("exec" | "attach")) => crate::params::ExecParams::default().populate_qp(qp),
        (None, Some("log")) => crate::params::LogParams::default().populate_qp(qp),
        (None, _) => {
            return Err(Error::Validation(format!(
                "connect to {} requires connect parameters",
                resource.name
            )))
        }
    }
    Ok(())
}
