mod test_connect_lifecycle;
mod test_send_requires_connection;
