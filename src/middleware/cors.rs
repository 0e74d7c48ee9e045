//! CORS restricted to loopback origins.
//!
//! Only pages served from the local machine (`localhost`, `127.0.0.0/8`,
//! `[::1]`, any scheme and port) get CORS headers. Every `OPTIONS` request is
//! answered with 204 right here and never reaches rate limiting or auth.

use actix_web::{
    body::EitherBody,
    dev::{forward_ready, Service, ServiceRequest, ServiceResponse, Transform},
    http::{
        header::{self, HeaderMap, HeaderValue},
        Method,
    },
    Error, HttpResponse,
};
use futures_util::future::LocalBoxFuture;
use std::future::{ready, Ready};
use std::net::IpAddr;

const ALLOW_METHODS: &str = "GET, POST, OPTIONS";
const ALLOW_HEADERS: &str = "Authorization, Content-Type";
const MAX_AGE: &str = "3600";

/// True for `scheme://host[:port]` origins whose host is a loopback name or address.
pub fn is_loopback_origin(origin: &str) -> bool {
    let Some((_, rest)) = origin.split_once("://") else {
        return false;
    };
    let authority = rest.split('/').next().unwrap_or_default();

    let host = if let Some(bracketed) = authority.strip_prefix('[') {
        match bracketed.split_once(']') {
            Some((host, _)) => host,
            None => return false,
        }
    } else {
        authority.split(':').next().unwrap_or_default()
    };

    host.eq_ignore_ascii_case("localhost")
        || host.parse::<IpAddr>().map(|ip| ip.is_loopback()).unwrap_or(false)
}

fn apply_cors_headers(headers: &mut HeaderMap, origin: HeaderValue) {
    headers.insert(header::ACCESS_CONTROL_ALLOW_ORIGIN, origin);
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_METHODS,
        HeaderValue::from_static(ALLOW_METHODS),
    );
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_HEADERS,
        HeaderValue::from_static(ALLOW_HEADERS),
    );
    headers.insert(header::ACCESS_CONTROL_MAX_AGE, HeaderValue::from_static(MAX_AGE));
}

pub struct LoopbackCors;

impl<S, B> Transform<S, ServiceRequest> for LoopbackCors
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error>,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<EitherBody<B>>;
    type Error = Error;
    type InitError = ();
    type Transform = LoopbackCorsMiddleware<S>;
    type Future = Ready<Result<Self::Transform, Self::InitError>>;

    fn new_transform(&self, service: S) -> Self::Future {
        ready(Ok(LoopbackCorsMiddleware { service }))
    }
}

pub struct LoopbackCorsMiddleware<S> {
    service: S,
}

impl<S, B> Service<ServiceRequest> for LoopbackCorsMiddleware<S>
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error>,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<EitherBody<B>>;
    type Error = Error;
    type Future = LocalBoxFuture<'static, Result<Self::Response, Self::Error>>;

    forward_ready!(service);

    fn call(&self, req: ServiceRequest) -> Self::Future {
        let allowed_origin = req
            .headers()
            .get(header::ORIGIN)
            .filter(|value| value.to_str().map(is_loopback_origin).unwrap_or(false))
            .cloned();

        if req.method() == Method::OPTIONS {
            let mut response = HttpResponse::NoContent().finish();
            if let Some(origin) = allowed_origin {
                apply_cors_headers(response.headers_mut(), origin);
            }
            let response = req.into_response(response).map_into_right_body();
            return Box::pin(async move { Ok(response) });
        }

        let fut = self.service.call(req);
        Box::pin(async move {
            let mut response = fut.await?;
            if let Some(origin) = allowed_origin {
                apply_cors_headers(response.headers_mut(), origin);
            }
            Ok(response.map_into_left_body())
        })
    }
}
