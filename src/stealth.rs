use chrono::{DateTime, Duration, Utc};
use rand::Rng;

// RFC 1123 date format used by HTTP Date and Last-Modified headers.
const HTTP_DATE_FORMAT: &str = "%a, %d %b %Y %H:%M:%S GMT";

const NGINX_HTML_BODY: &str = r#"<!DOCTYPE html>
<html>
<head>
<title>Welcome to nginx!</title>
<style>
    body {
        width: 35em;
        margin: 0 auto;
        font-family: Tahoma, Verdana, Arial, sans-serif;
    }
</style>
</head>
<body>
<h1>Welcome to nginx!</h1>
<p>If you see this page, the nginx web server is successfully installed and
working. Further configuration is required.</p>

<p>For online documentation and support please refer to
<a href="http://nginx.org/">nginx.org</a>.<br/>
Commercial support is available at
<a href="http://nginx.com/">nginx.com</a>.</p>

<p><em>Thank you for using nginx.</em></p>
</body>
</html>"#;

// The default welcome page of an Apache2 installation on Ubuntu.
const APACHE_HTML_BODY: &str = r#"<!DOCTYPE html PUBLIC "-//W3C//DTD XHTML 1.0 Transitional//EN" "http://www.w3.org/TR/xhtml1/DTD/xhtml1-transitional.dtd">
<html xmlns="http://www.w3.org/1999/xhtml">
  <head>
    <meta http-equiv="Content-Type" content="text/html; charset=UTF-8" />
    <title>Apache2 Ubuntu Default Page: It works</title>
    <style type="text/css" media="screen">
      * {
        margin: 0px 0px 0px 0px;
        padding: 0px 0px 0px 0px;
      }
      body, html {
        padding: 3px 3px 3px 3px;
        background-color: #D8DBE2;
        font-family: Verdana, sans-serif;
        font-size: 11pt;
      }
    </style>
  </head>
  <body>
    <div style="margin-left: auto; margin-right: auto; width: 760px; text-align: left;">
      <p style="text-align: center;">
        <b><span style="font-size: 14pt;">Apache2 Ubuntu Default Page</span></b>
      </p>
	  <p>
	    This is the default welcome page used to test the correct
	    operation of the Apache2 server after installation on Ubuntu systems.
	  </p>
    </div>
  </body>
</html>"#;

fn http_date(time: DateTime<Utc>) -> String {
    time.format(HTTP_DATE_FORMAT).to_string()
}

// A random moment within the last year, so repeated scans see a stable-looking
// but not obviously canned page. Never a future date.
fn last_modified() -> String {
    let days_ago = rand::rng().random_range(1..=365);
    http_date(Utc::now() - Duration::days(days_ago))
}

// Full HTTP response mimicking a stock Nginx installation serving its
// welcome page.
pub fn nginx_response() -> Vec<u8> {
    let mut response = format!(
        "HTTP/1.1 200 OK\r\n\
         Server: nginx/1.18.0 (Ubuntu)\r\n\
         Date: {}\r\n\
         Content-Type: text/html\r\n\
         Content-Length: {}\r\n\
         Last-Modified: {}\r\n\
         Connection: close\r\n\
         ETag: \"5f4e3a9c-265\"\r\n\
         Accept-Ranges: bytes\r\n\
         \r\n",
        http_date(Utc::now()),
        NGINX_HTML_BODY.len(),
        last_modified(),
    )
    .into_bytes();
    response.extend_from_slice(NGINX_HTML_BODY.as_bytes());
    response
}

// Full HTTP response mimicking a stock Apache installation. Apache orders its
// headers differently from Nginx, which scanners do fingerprint.
pub fn apache_response() -> Vec<u8> {
    let mut response = format!(
        "HTTP/1.1 200 OK\r\n\
         Date: {}\r\n\
         Server: Apache/2.4.41 (Ubuntu)\r\n\
         Last-Modified: {}\r\n\
         ETag: \"2d-4e9a49938b880\"\r\n\
         Accept-Ranges: bytes\r\n\
         Content-Length: {}\r\n\
         Vary: Accept-Encoding\r\n\
         Content-Type: text/html\r\n\
         Connection: close\r\n\
         \r\n",
        http_date(Utc::now()),
        last_modified(),
        APACHE_HTML_BODY.len(),
    )
    .into_bytes();
    response.extend_from_slice(APACHE_HTML_BODY.as_bytes());
    response
}
